//! Server configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete server configuration, loaded from `config.toml` in the data
/// directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP settings.
    #[serde(default)]
    pub http: HttpConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Payment-provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Checkout redirect settings.
    #[serde(default)]
    pub checkout: CheckoutConfig,
}

/// HTTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Payment-provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider API base URL.
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    /// Provider API key.
    #[serde(default)]
    pub api_key: String,
    /// Shared secret for webhook signature verification.
    #[serde(default)]
    pub webhook_secret: String,
    /// Request timeout for provider calls, in seconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

/// Checkout redirect configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutConfig {
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
}

// Default value functions

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_provider_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_provider_timeout() -> u64 {
    10
}

fn default_success_url() -> String {
    "https://verba.app/checkout/success?session_id={CHECKOUT_SESSION_ID}".to_string()
}

fn default_cancel_url() -> String {
    "https://verba.app/checkout/cancelled".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            api_key: String::new(),
            webhook_secret: String::new(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            success_url: default_success_url(),
            cancel_url: default_cancel_url(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: ServerConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        // Check env var override first
        if let Ok(dir) = std::env::var("VERBA_DATA_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("VERBA_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".verba"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/verba"))
    }
}
