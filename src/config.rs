//! Engine Configuration
//!
//! Holds the connection endpoint, timing policy, and local storage location
//! for one engine instance. One config maps to one document session.

use std::path::PathBuf;
use std::time::Duration;

/// Default session endpoint
const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000";

/// Connect handshake deadline
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed delay between automatic reconnect attempts
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Automatic reconnect budget before the engine goes terminal
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Window within which a repeated JOIN for the same collaborator is
/// treated as a duplicate, and within which a repeated chat line from the
/// same sender is dropped
const DEFAULT_DEDUPE_WINDOW: Duration = Duration::from_secs(5);

/// Configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Endpoint base, e.g. `wss://example.com`
    pub endpoint: String,
    /// Document this session collaborates on
    pub document_id: String,
    /// Auth token appended to the session URL
    pub auth_token: Option<String>,
    /// Connect handshake deadline
    pub connect_timeout: Duration,
    /// Fixed delay before an automatic reconnect
    pub reconnect_delay: Duration,
    /// Automatic reconnect budget
    pub max_reconnect_attempts: u32,
    /// JOIN / chat dedupe window
    pub dedupe_window: Duration,
    /// Where the persisted collaboration flag and join-dedupe records
    /// live; `None` keeps them in memory only
    pub storage_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Create a configuration for a document session with default policy
    pub fn new(document_id: impl Into<String>) -> Self {
        let endpoint =
            std::env::var("ARENA_COLLAB_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Self {
            endpoint,
            document_id: document_id.into(),
            auth_token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            dedupe_window: DEFAULT_DEDUPE_WINDOW,
            storage_path: None,
        }
    }

    /// Override the endpoint base
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the auth token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Persist local state at the given path
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Build the per-document session URL.
    ///
    /// `via_link` marks the joining client as entitlement-exempt for this
    /// session and is carried as a query parameter so the server can tell.
    pub fn session_url(&self, via_link: bool) -> String {
        let mut url = format!(
            "{}/collab/{}/?token={}",
            self.endpoint.trim_end_matches('/'),
            self.document_id,
            self.auth_token.as_deref().unwrap_or(""),
        );
        if via_link {
            url.push_str("&via_link=true");
        }
        url
    }
}
