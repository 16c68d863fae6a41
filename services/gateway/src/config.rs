//! Configuration types and loading
//!
//! The gateway is configured from one TOML file: listener settings, the
//! key-pool policy, one base URL per backend family, and the model table
//! that maps client-facing model IDs to families. Credentials never live
//! in the TOML; they come from the credential source chain.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use common::{Error, Result};
use dialect::{BackendFamily, ReasoningLevel};
use keypool::Algorithm;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Prefix injected into direct-route system/instructions fields.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Key-pool policy for multi-key credential sources
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default = "default_true")]
    pub remove_on_quota: bool,
    #[serde(default = "default_audit_file")]
    pub audit_file: PathBuf,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            remove_on_quota: true,
            audit_file: default_audit_file(),
        }
    }
}

/// One base URL per backend family. A family without a URL is
/// unconfigured; requests routed to it fail with a server error.
#[derive(Debug, Default, Deserialize)]
pub struct Endpoints {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub passthrough: Option<String>,
}

impl Endpoints {
    pub fn url(&self, family: BackendFamily) -> Option<&str> {
        match family {
            BackendFamily::Anthropic => self.anthropic.as_deref(),
            BackendFamily::OpenAi => self.openai.as_deref(),
            BackendFamily::Passthrough => self.passthrough.as_deref(),
        }
    }
}

/// One client-facing model and its routing/reasoning settings
#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub family: BackendFamily,
    #[serde(default)]
    pub reasoning: ReasoningLevel,
}

fn default_max_connections() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_audit_file() -> PathBuf {
    PathBuf::from("deprecated_keys.txt")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(Error::Config("max_connections must be nonzero".into()));
        }
        for family in [
            BackendFamily::Anthropic,
            BackendFamily::OpenAi,
            BackendFamily::Passthrough,
        ] {
            if let Some(url) = self.endpoints.url(family) {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(Error::Config(format!(
                        "{family} endpoint must be an http(s) URL: {url}"
                    )));
                }
            }
        }
        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if !seen.insert(model.id.as_str()) {
                return Err(Error::Config(format!("duplicate model id: {}", model.id)));
            }
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("gateway.toml")
    }

    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:3000"
system_prompt = "You are a relay."

[pool]
algorithm = "simple"
remove_on_quota = false
audit_file = "/var/lib/relay/deprecated_keys.txt"

[endpoints]
anthropic = "https://backend.example.com/v1/messages"
openai = "https://backend.example.com/v1/responses"

[[models]]
id = "claude-x"
family = "anthropic"
reasoning = "medium"

[[models]]
id = "gpt-x"
family = "openai"
"#
    }

    #[test]
    fn load_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, valid_toml()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr.port(), 3000);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.pool.algorithm, Algorithm::Simple);
        assert!(!config.pool.remove_on_quota);
        assert_eq!(
            config.endpoints.url(BackendFamily::Anthropic),
            Some("https://backend.example.com/v1/messages")
        );
        assert_eq!(config.endpoints.url(BackendFamily::Passthrough), None);

        let claude = config.model("claude-x").unwrap();
        assert_eq!(claude.family, BackendFamily::Anthropic);
        assert_eq!(claude.reasoning, ReasoningLevel::Medium);
        // Unset reasoning defaults to stripping the caller's directive.
        assert_eq!(config.model("gpt-x").unwrap().reasoning, ReasoningLevel::Off);
    }

    #[test]
    fn pool_section_is_optional_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[server]\nlisten_addr = \"127.0.0.1:0\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.pool.algorithm, Algorithm::Weighted);
        assert!(config.pool.remove_on_quota);
        assert_eq!(config.pool.audit_file, PathBuf::from("deprecated_keys.txt"));
        assert!(config.models.is_empty());
    }

    #[test]
    fn duplicate_model_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
[server]
listen_addr = "127.0.0.1:0"

[[models]]
id = "m"
family = "anthropic"

[[models]]
id = "m"
family = "openai"
"#,
        )
        .unwrap();

        let result = Config::load(&path);
        assert!(result.is_err());
    }

    #[test]
    fn non_http_endpoint_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
[server]
listen_addr = "127.0.0.1:0"

[endpoints]
anthropic = "ftp://backend.example.com"
"#,
        )
        .unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn zero_max_connections_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            "[server]\nlisten_addr = \"127.0.0.1:0\"\nmax_connections = 0\n",
        )
        .unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(Config::load(Path::new("/nonexistent/gateway.toml")).is_err());
    }

    #[test]
    fn load_invalid_toml_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid {{{{ toml").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn resolve_path_prefers_cli_argument() {
        let path = Config::resolve_path(Some("/etc/relay/gateway.toml"));
        assert_eq!(path, PathBuf::from("/etc/relay/gateway.toml"));
    }
}
