//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use tabpilot_agent::{AgentRuntime, Coordinator};
use tabpilot_client::{format_response, listener, ArtifactStore, ContentBlock, PilotClient};
use tabpilot_config::Config;
use tabpilot_host_cdp::CdpHost;
use tabpilot_protocols::{AgentResponse, BatchOperation, BrowserHost, Command, Viewport};

use crate::cli::SessionArgs;

/// Contents of a batch file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum BatchFile {
    Full {
        operations: Vec<BatchOperation>,
        #[serde(default)]
        interval_ms: Option<u64>,
    },
    Operations(Vec<BatchOperation>),
}

impl BatchFile {
    pub(crate) fn into_parts(self) -> (Vec<BatchOperation>, Option<u64>) {
        match self {
            BatchFile::Full {
                operations,
                interval_ms,
            } => (operations, interval_ms),
            BatchFile::Operations(operations) => (operations, None),
        }
    }
}

pub(crate) async fn run_agent(
    mut config: Config,
    cdp_endpoint: Option<String>,
    orchestrator: Option<String>,
) -> anyhow::Result<()> {
    if let Some(endpoint) = cdp_endpoint {
        config.host.cdp_endpoint = endpoint;
    }
    if let Some(url) = orchestrator {
        config.agent.orchestrator_url = url;
    }

    let host: Arc<dyn BrowserHost> = Arc::new(
        CdpHost::connect(&config.host)
            .await
            .with_context(|| format!("cannot reach Chrome at {}", config.host.cdp_endpoint))?,
    );
    let viewport = config.viewport.map(|v| Viewport::new(v.width, v.height));
    let coordinator = Arc::new(Coordinator::new(host, config.timing.clone(), viewport));
    let runtime = AgentRuntime::new(config.agent.clone(), coordinator);

    info!("agent starting, orchestrator at {}", config.agent.orchestrator_url);
    tokio::select! {
        result = runtime.run() => result.context("agent stopped")?,
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }
    Ok(())
}

pub(crate) async fn run_exec(
    config: Config,
    command: &str,
    params: &str,
    session: SessionArgs,
) -> anyhow::Result<()> {
    let params: Value = serde_json::from_str(params).context("--params must be JSON")?;
    let Value::Object(payload) = params else {
        bail!("--params must be a JSON object");
    };
    // Parse locally so bad input never reaches the agent.
    let command = Command::parse(command, &payload)?;

    let client = connect(&config, &session).await?;
    let response = client.execute_raw(&command).await?;
    report(&config, &session, &response).await
}

pub(crate) async fn run_batch(
    config: Config,
    file: &Path,
    interval_ms: Option<u64>,
    session: SessionArgs,
) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let batch: BatchFile =
        serde_json::from_str(&content).with_context(|| format!("{} is not a batch file", file.display()))?;
    let (operations, file_interval) = batch.into_parts();
    if operations.is_empty() {
        bail!("{} holds no operations", file.display());
    }
    let interval = interval_ms
        .or(file_interval)
        .unwrap_or(config.timing.batch_interval_ms);

    let client = connect(&config, &session).await?;
    let response = client.batch(operations, Some(interval)).await?;
    report(&config, &session, &response).await
}

/// Start the listener and wait for the agent to dial in.
async fn connect(config: &Config, session: &SessionArgs) -> anyhow::Result<Arc<PilotClient>> {
    let client = Arc::new(PilotClient::from_config(&config.relay));
    let addr = listener::serve(client.clone(), &config.relay).await?;
    info!("listening on {}", addr);
    client
        .wait_for_agent(Duration::from_secs(session.agent_timeout))
        .await
        .context("no agent connected")?;
    Ok(client)
}

/// Print the response and save its artifacts. Error responses fail the run.
async fn report(config: &Config, session: &SessionArgs, response: &AgentResponse) -> anyhow::Result<()> {
    for block in format_response(response) {
        match block {
            ContentBlock::Text { text } => println!("{text}"),
            ContentBlock::Image { data, mime_type } => {
                println!("[image: {} bytes, {}]", data.len(), mime_type)
            }
        }
    }

    let artifact_dir = session.artifact_dir.as_ref().or(config.relay.artifact_dir.as_ref());
    if let Some(dir) = artifact_dir {
        let store = ArtifactStore::new(dir.clone()).await?;
        match store.save_response(response).await {
            Ok(paths) => {
                for path in paths {
                    println!("saved {}", path.display());
                }
            }
            Err(e) => warn!("could not save artifacts: {}", e),
        }
    }

    if let Some(error) = response.as_error() {
        return Err(error.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_file_shapes() {
        let full: BatchFile = serde_json::from_str(
            r#"{"operations": [{"name": "click", "parameters": {"coordinate": "1,2"}}], "interval_ms": 250}"#,
        )
        .unwrap();
        let (operations, interval) = full.into_parts();
        assert_eq!(operations.len(), 1);
        assert_eq!(interval, Some(250));

        let bare: BatchFile =
            serde_json::from_str(r#"[{"name": "takeScreenshot"}, {"name": "wait", "parameters": {"seconds": 1}}]"#)
                .unwrap();
        let (operations, interval) = bare.into_parts();
        assert_eq!(operations.len(), 2);
        assert_eq!(operations[0].parameters, Value::Null);
        assert_eq!(interval, None);
    }

    #[test]
    fn test_batch_file_rejects_garbage() {
        assert!(serde_json::from_str::<BatchFile>(r#"{"steps": []}"#).is_err());
    }
}
