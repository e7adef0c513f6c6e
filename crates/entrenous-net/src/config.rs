//! Engine configuration loaded from environment variables.
//!
//! Both endpoints default to a local development server so a client can
//! start with zero configuration.

/// Endpoints the engine talks to.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the REST bootstrap API.
    /// Env: `ENTRENOUS_API_URL`
    /// Default: `http://localhost:8000`
    pub api_base_url: String,

    /// Base URL of the realtime WebSocket endpoint.
    /// Env: `ENTRENOUS_WS_URL`
    /// Default: `ws://localhost:8000`
    pub ws_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            ws_base_url: "ws://localhost:8000".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("ENTRENOUS_API_URL") {
            config.api_base_url = url;
        }

        if let Ok(url) = std::env::var("ENTRENOUS_WS_URL") {
            config.ws_base_url = url;
        }

        config
    }
}
