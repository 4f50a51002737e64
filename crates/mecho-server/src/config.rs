use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// `mecho-server.toml` + `MECHO_*` env overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MechoConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Default for MechoConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root directory each mode's `mecho.db`/`archival.db` pair lives under.
    #[serde(default = "default_modes_root")]
    pub modes_root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            modes_root: default_modes_root(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_modes_root() -> String {
    relay_core::config::home_relative("mecho/data/modes")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding endpoint (legacy path tried first, then
    /// the modern path on a 404).
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            api_key: None,
        }
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com".to_string()
}
