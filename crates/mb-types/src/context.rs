use serde::{Deserialize, Serialize};

/// Environment variable holding the tracking API URL.
pub const API_URL_ENV: &str = "MODEL_BUILDER_API_URL";

/// Environment variable holding the tracking API token.
pub const API_TOKEN_ENV: &str = "MODEL_BUILDER_API_TOKEN";

/// Connection info the training callback uses to report metrics.
///
/// Built once per run at the process entry point and passed explicitly to
/// everything that talks to the tracking service. When `host` is `None` the
/// run is tracked locally.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub host: Option<String>,
    pub token: Option<String>,
}

impl RunContext {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            token: Some(token.into()),
        }
    }

    /// A context without a remote host.
    pub fn local() -> Self {
        Self::default()
    }

    /// Read the host and token from the process environment. Empty values
    /// are treated as unset.
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            host: read(API_URL_ENV),
            token: read(API_TOKEN_ENV),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    /// Host label for tagging runs.
    pub fn host_label(&self) -> &str {
        self.host.as_deref().unwrap_or("local")
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("host", &self.host)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_token() {
        let ctx = RunContext::new("https://tracking.example.com", "secret-token");
        let out = format!("{ctx:?}");
        assert!(out.contains("tracking.example.com"));
        assert!(!out.contains("secret-token"));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn local_context_has_no_host() {
        let ctx = RunContext::local();
        assert!(!ctx.is_remote());
        assert_eq!(ctx.host_label(), "local");
    }
}
