//! Configuration validation.

use crate::schema::{Config, StabilityConfig};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_relay(config, &mut result);
        Self::validate_agent(config, &mut result);
        Self::validate_timing(config, &mut result);
        Self::validate_viewport(config, &mut result);

        result
    }

    fn validate_relay(config: &Config, result: &mut ValidationResult) {
        if config.relay.port == 0 {
            result.add_error(ValidationError::new("relay.port", "Port cannot be 0"));
        }

        if !config.relay.path.starts_with('/') {
            result.add_error(ValidationError::new("relay.path", "Path must start with '/'"));
        }

        if config.relay.request_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "relay.request_timeout_ms",
                "request_timeout_ms must be greater than 0",
            ));
        }

        if config.relay.batch_timeout_ms < config.relay.request_timeout_ms {
            result.add_warning(ValidationWarning::new(
                "relay.batch_timeout_ms",
                "batch_timeout_ms is shorter than request_timeout_ms, batches may time out early",
            ));
        }
    }

    fn validate_agent(config: &Config, result: &mut ValidationResult) {
        let url = &config.agent.orchestrator_url;
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            result.add_error(ValidationError::new(
                "agent.orchestrator_url",
                "orchestrator_url must start with ws:// or wss://",
            ));
        }
    }

    fn validate_timing(config: &Config, result: &mut ValidationResult) {
        let timing = &config.timing;

        if timing.fast_detect_ms >= timing.long_wait_ms {
            result.add_error(ValidationError::new(
                "timing.fast_detect_ms",
                "fast_detect_ms must be below long_wait_ms",
            ));
        }

        if timing.attach_retries == 0 {
            result.add_error(ValidationError::new(
                "timing.attach_retries",
                "attach_retries must be at least 1",
            ));
        }

        if timing.busy_wait_ms < 1000 {
            result.add_warning(ValidationWarning::new(
                "timing.busy_wait_ms",
                "busy_wait_ms below 1s will force-reset targets aggressively",
            ));
        }

        if timing.scroll_step <= 0 {
            result.add_error(ValidationError::new(
                "timing.scroll_step",
                "scroll_step must be positive",
            ));
        }

        Self::validate_stability("timing.stability_new", &timing.stability_new, result);
        Self::validate_stability(
            "timing.stability_existing",
            &timing.stability_existing,
            result,
        );
    }

    fn validate_stability(path: &str, stability: &StabilityConfig, result: &mut ValidationResult) {
        if stability.required_samples == 0 {
            result.add_error(ValidationError::new(
                format!("{path}.required_samples"),
                "required_samples must be at least 1",
            ));
        }

        if stability.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                format!("{path}.poll_interval_ms"),
                "poll_interval_ms must be greater than 0",
            ));
        }

        if stability.poll_interval_ms > stability.timeout_ms {
            result.add_warning(ValidationWarning::new(
                format!("{path}.poll_interval_ms"),
                "poll interval exceeds timeout, at most one sample will be taken",
            ));
        }
    }

    fn validate_viewport(config: &Config, result: &mut ValidationResult) {
        if let Some(viewport) = &config.viewport {
            if viewport.width == 0 || viewport.height == 0 {
                result.add_error(ValidationError::new(
                    "viewport",
                    "viewport width and height must be positive",
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
