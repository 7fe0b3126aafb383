//! Configuration data types

use serde::{Deserialize, Serialize};

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlutoConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Remote authentication service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL the `/auth/*` paths are resolved against
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
}

/// Where the session is persisted between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One file per key under `data_dir`
    File,
    /// Nothing survives the process
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend, `~` is expanded
    pub data_dir: String,
}

/// How a failed token verification is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationMode {
    /// Any failure, including an unreachable server, ends the session
    #[default]
    FailClosed,
    /// Only an explicit 401/403 from the server ends the session
    RejectionsOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub invalidation: InvalidationMode,
}
