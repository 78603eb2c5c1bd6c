// Copyright 2025 Corpusgate Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

/// Corpusgate gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// Listening port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used to build user-facing links.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// CORS allow-list. Empty = public base URL plus local loopback.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Generative-search API key. Required; startup aborts without it.
    #[serde(default)]
    pub api_key: String,

    /// Upstream API base URL.
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,

    /// Default model used when a tool call does not override it.
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-request timeout in seconds, distinct from the session heartbeat.
    #[serde(default = "default_upstream_timeout")]
    pub request_timeout_secs: u64,
}

/// Backing tenant directory. Optional: when no URL is configured the auth
/// resolver runs in open/no-tenant mode and tenant-scoped tools refuse to
/// operate.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DirectoryConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

fn default_port() -> u16 {
    3001
}

fn default_public_base_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_upstream_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_upstream_timeout() -> u64 {
    60
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_base_url: default_public_base_url(),
            cors_origins: vec![],
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_upstream_base_url(),
            model: default_model(),
            request_timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: HttpServerConfig::default(),
            upstream: UpstreamConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - CORPUSGATE_PORT: listening port (default: 3001)
    /// - CORPUSGATE_PUBLIC_BASE_URL: externally reachable base URL
    /// - CORPUSGATE_CORS_ORIGINS: comma-separated CORS allow-list
    /// - CORPUSGATE_UPSTREAM_API_KEY: generative-search API key (required)
    /// - CORPUSGATE_UPSTREAM_BASE_URL: upstream API base URL
    /// - CORPUSGATE_UPSTREAM_MODEL: default model name
    /// - CORPUSGATE_DIRECTORY_URL: tenant directory base URL (optional)
    /// - CORPUSGATE_DIRECTORY_ANON_KEY: tenant directory anonymous key
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("CORPUSGATE_PORT") {
            if let Ok(val) = port.parse() {
                config.server.port = val;
            }
        }

        if let Ok(base) = std::env::var("CORPUSGATE_PUBLIC_BASE_URL") {
            config.server.public_base_url = base;
        }

        if let Ok(origins) = std::env::var("CORPUSGATE_CORS_ORIGINS") {
            config.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(key) = std::env::var("CORPUSGATE_UPSTREAM_API_KEY") {
            config.upstream.api_key = key;
        }

        if let Ok(base) = std::env::var("CORPUSGATE_UPSTREAM_BASE_URL") {
            config.upstream.base_url = base;
        }

        if let Ok(model) = std::env::var("CORPUSGATE_UPSTREAM_MODEL") {
            config.upstream.model = model;
        }

        if let Ok(url) = std::env::var("CORPUSGATE_DIRECTORY_URL") {
            config.directory.url = Some(url);
        }

        if let Ok(key) = std::env::var("CORPUSGATE_DIRECTORY_ANON_KEY") {
            config.directory.anon_key = Some(key);
        }

        config
    }

    /// Load configuration with priority: env > file > defaults.
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        Ok(Self::merge_with_env(config))
    }

    /// Merge config with environment variables (env takes priority).
    fn merge_with_env(mut config: Self) -> Self {
        let env_config = Self::from_env();

        if std::env::var("CORPUSGATE_PORT").is_ok() {
            config.server.port = env_config.server.port;
        }
        if std::env::var("CORPUSGATE_PUBLIC_BASE_URL").is_ok() {
            config.server.public_base_url = env_config.server.public_base_url;
        }
        if std::env::var("CORPUSGATE_CORS_ORIGINS").is_ok() {
            config.server.cors_origins = env_config.server.cors_origins;
        }
        if std::env::var("CORPUSGATE_UPSTREAM_API_KEY").is_ok() {
            config.upstream.api_key = env_config.upstream.api_key;
        }
        if std::env::var("CORPUSGATE_UPSTREAM_BASE_URL").is_ok() {
            config.upstream.base_url = env_config.upstream.base_url;
        }
        if std::env::var("CORPUSGATE_UPSTREAM_MODEL").is_ok() {
            config.upstream.model = env_config.upstream.model;
        }
        if std::env::var("CORPUSGATE_DIRECTORY_URL").is_ok() {
            config.directory.url = env_config.directory.url;
        }
        if std::env::var("CORPUSGATE_DIRECTORY_ANON_KEY").is_ok() {
            config.directory.anon_key = env_config.directory.anon_key;
        }

        config
    }

    /// Listening socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.server.port))
    }

    /// Effective CORS allow-list: the configured origins, or the public
    /// base URL plus local loopback addresses when none are configured.
    pub fn allowed_origins(&self) -> Vec<String> {
        if !self.server.cors_origins.is_empty() {
            return self.server.cors_origins.clone();
        }
        vec![
            self.server.public_base_url.clone(),
            "http://localhost:3000".to_string(),
            "http://127.0.0.1:3000".to_string(),
        ]
    }

    /// True when a backing tenant directory is configured.
    pub fn directory_configured(&self) -> bool {
        self.directory.url.is_some()
    }

    /// Validate configuration. A missing upstream API key is the one fatal
    /// startup error: the gateway refuses to start without it.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.api_key.trim().is_empty() {
            anyhow::bail!(
                "Upstream API key is not configured. \
                Set CORPUSGATE_UPSTREAM_API_KEY or [upstream].api_key in the config file."
            );
        }

        if self.directory.url.is_some() && self.directory.anon_key.is_none() {
            anyhow::bail!("Tenant directory URL is configured but the anonymous key is missing");
        }

        if self.directory.url.is_none() {
            tracing::warn!(
                "No tenant directory configured: running in open mode, \
                tenant-scoped tools will refuse to operate"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_port() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, 3001);
        assert!(!config.directory_configured());
    }

    #[test]
    fn validate_rejects_missing_api_key() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_api_key_without_directory() {
        let mut config = GatewayConfig::default();
        config.upstream.api_key = "key-123".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_requires_anon_key_with_directory_url() {
        let mut config = GatewayConfig::default();
        config.upstream.api_key = "key-123".into();
        config.directory.url = Some("https://directory.example.com".into());
        assert!(config.validate().is_err());

        config.directory.anon_key = Some("anon".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn allowed_origins_defaults_include_loopback() {
        let config = GatewayConfig::default();
        let origins = config.allowed_origins();
        assert!(origins.contains(&"http://localhost:3000".to_string()));
        assert!(origins.contains(&config.server.public_base_url));
    }

    #[test]
    fn allowed_origins_prefers_configured_list() {
        let mut config = GatewayConfig::default();
        config.server.cors_origins = vec!["https://app.example.com".into()];
        assert_eq!(config.allowed_origins(), vec!["https://app.example.com"]);
    }
}
