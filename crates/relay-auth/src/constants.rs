//! Credential source and identity-provider constants
//!
//! The client ID is not a secret - it identifies the public client
//! application at the identity provider. The actual secrets (refresh and
//! access tokens) live in [`crate::token::TokenLifecycle`].

use std::time::Duration;

/// Identity-provider endpoint for refresh-token grants
pub const REFRESH_ENDPOINT: &str = "https://api.workos.com/user_management/authenticate";

/// Fallback public OAuth client ID used when none was issued alongside the
/// refresh token
pub const FALLBACK_CLIENT_ID: &str = "client_01HNM792M5G5G1A2THWPXKFMXB";

/// Access tokens are refreshed once this much time has passed since the
/// last successful refresh
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Environment variable holding one or more `;`-separated API keys
pub const MULTI_KEY_ENV: &str = "RELAY_API_KEY";

/// Newline-delimited key list file, looked up in the working directory
pub const KEYS_FILE_NAME: &str = "relay_keys.txt";

/// Environment variable holding a bare refresh token
pub const REFRESH_ENV: &str = "RELAY_REFRESH_KEY";

/// Per-user auth file relative to the home directory
pub const USER_AUTH_FILE: &str = ".relay/auth.json";

/// Persistence target for env-sourced refresh tokens, relative to the
/// working directory
pub const ENV_PERSIST_FILE: &str = "auth.json";
