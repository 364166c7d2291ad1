//! Page-side expressions evaluated through the instrumentation channel.

/// Content-readiness signal plus a size fingerprint of the document.
pub const STABILITY_SAMPLE: &str = "({readyState: document.readyState, length: document.documentElement ? document.documentElement.outerHTML.length : 0})";

pub const PAGE_HTML: &str = "document.documentElement ? document.documentElement.outerHTML : ''";

pub const VIEWPORT_SIZE: &str = "({width: window.innerWidth, height: window.innerHeight})";
