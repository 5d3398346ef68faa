//! Local administrator credentials for the legacy service.
//!
//! The credential file is line-oriented `KEY=VALUE` text. Blank lines and
//! `#` comments are ignored, and values may be wrapped in single or double
//! quotes.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use addon_common::{AddonError, AddonResult};

/// Key holding the administrator user name.
pub const ADMIN_USER_KEY: &str = "PORTAINER_LOCAL_ADMIN_USER";

/// Key holding the administrator password.
pub const ADMIN_PASSWORD_KEY: &str = "PORTAINER_LOCAL_ADMIN_PW";

/// Administrator credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AdminCredentials {
    /// Reads credentials from a `KEY=VALUE` file.
    pub fn load(path: impl AsRef<Path>) -> AddonResult<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| AddonError::io("read credentials", path, e))?;
        Self::parse(&content)
    }

    /// Parses credentials from `KEY=VALUE` text.
    pub fn parse(content: &str) -> AddonResult<Self> {
        let values = parse_env_lines(content);

        let take = |key: &str| {
            values
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| AddonError::auth(format!("credential file has no {}", key)))
        };

        Ok(Self {
            username: take(ADMIN_USER_KEY)?,
            password: take(ADMIN_PASSWORD_KEY)?,
        })
    }
}

/// Parses `KEY=VALUE` lines; later keys override earlier ones.
fn parse_env_lines(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
