//! Startup credential source resolution
//!
//! The chain is walked once at startup, highest priority first:
//! 1. `RELAY_API_KEY` env var, `;`-separated keys
//! 2. `relay_keys.txt` in the working directory, newline-delimited
//! 3. `RELAY_REFRESH_KEY` env var, a bare refresh token
//! 4. `~/.relay/auth.json`, `{refresh_token, access_token?}`
//! 5. Client-supplied mode: every request must carry its own credential
//!
//! A candidate that cannot be read or parsed is logged and treated as
//! absent; resolution never fails.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::constants::{
    ENV_PERSIST_FILE, KEYS_FILE_NAME, MULTI_KEY_ENV, REFRESH_ENV, USER_AUTH_FILE,
};

/// Where the gateway's outbound credentials come from, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// One or more static API keys managed by the key pool.
    MultiKey { secrets: Vec<String> },
    /// A refresh token exchanged periodically for access tokens.
    RefreshToken {
        token: String,
        /// Access token seeded from the auth file, if it carried one.
        access_token: Option<String>,
        /// Where refreshed tokens are persisted.
        persist_path: PathBuf,
        /// Whether persistence merges into existing JSON instead of
        /// overwriting (true for the per-user auth file).
        merge_on_persist: bool,
    },
    /// No configured credential; requests forward their own authorization.
    ClientSupplied,
}

/// Filesystem locations consulted by the chain. Injectable so tests can
/// point them at temp directories.
#[derive(Debug, Clone)]
pub struct SourcePaths {
    pub keys_file: PathBuf,
    pub user_auth_file: PathBuf,
    pub env_persist_file: PathBuf,
}

impl SourcePaths {
    /// Standard locations: working directory for the key list and env-token
    /// persistence, home directory for the per-user auth file.
    pub fn from_process() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| cwd.clone());
        Self {
            keys_file: cwd.join(KEYS_FILE_NAME),
            user_auth_file: home.join(USER_AUTH_FILE),
            env_persist_file: cwd.join(ENV_PERSIST_FILE),
        }
    }
}

#[derive(Deserialize)]
struct AuthFile {
    refresh_token: Option<String>,
    access_token: Option<String>,
}

/// Walk the priority chain and fix the credential source.
pub fn resolve(paths: &SourcePaths) -> CredentialSource {
    if let Some(value) = non_empty_env(MULTI_KEY_ENV) {
        let secrets = parse_multi_key(&value);
        if !secrets.is_empty() {
            info!(count = secrets.len(), "using API keys from {MULTI_KEY_ENV}");
            return CredentialSource::MultiKey { secrets };
        }
    }

    if let Some(secrets) = read_keys_file(&paths.keys_file) {
        if !secrets.is_empty() {
            info!(
                count = secrets.len(),
                path = %paths.keys_file.display(),
                "using API keys from key list file"
            );
            return CredentialSource::MultiKey { secrets };
        }
    }

    if let Some(token) = non_empty_env(REFRESH_ENV) {
        info!("using refresh token from {REFRESH_ENV}");
        return CredentialSource::RefreshToken {
            token,
            access_token: None,
            persist_path: paths.env_persist_file.clone(),
            merge_on_persist: false,
        };
    }

    if let Some((token, access_token)) = read_auth_file(&paths.user_auth_file) {
        info!(path = %paths.user_auth_file.display(), "using refresh token from auth file");
        return CredentialSource::RefreshToken {
            token,
            access_token,
            persist_path: paths.user_auth_file.clone(),
            merge_on_persist: true,
        };
    }

    info!("no credential configuration found, forwarding client authorization");
    CredentialSource::ClientSupplied
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a `;`-separated key list, dropping empty entries.
pub fn parse_multi_key(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a newline-delimited key list, dropping blanks and `#`-comments.
pub fn parse_keys_file(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|k| !k.is_empty() && !k.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn read_keys_file(path: &Path) -> Option<Vec<String>> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => Some(parse_keys_file(&contents)),
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to read key list file, skipping");
            None
        }
    }
}

fn read_auth_file(path: &Path) -> Option<(String, Option<String>)> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to read auth file, skipping");
            return None;
        }
    };
    let parsed: AuthFile = match serde_json::from_str(&contents) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to parse auth file, skipping");
            return None;
        }
    };
    let token = parsed
        .refresh_token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())?;
    let access_token = parsed
        .access_token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    Some((token, access_token))
}
