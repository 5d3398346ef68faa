//! Bearer token lifecycle.
//!
//! The legacy service issues JWTs with an `exp` claim. Before every remote
//! call the session feeds a [`TokenEvent::Check`] into [`TokenState::transition`];
//! the resulting state says whether the cached token may be used or a new
//! one must be obtained first.
//!
//! ```text
//! Unauthenticated --Authenticated--> Valid --Check(within window)--> NearExpiry
//!        ^                             |                                 |
//!        |                             +--Check(past exp)--> Expired <---+
//!        +----------------------LoggedOut (from any state)
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use addon_common::{AddonError, AddonResult};

/// Token state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    /// No token has been obtained (or it was discarded on logout).
    Unauthenticated,
    /// Token usable; expiry is outside the safety window.
    Valid {
        token: String,
        expires_at: DateTime<Utc>,
    },
    /// Token still accepted but expires within the safety window.
    NearExpiry {
        token: String,
        expires_at: DateTime<Utc>,
    },
    /// Token expiry has passed.
    Expired,
}

/// Input to the token state machine.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    /// Evaluate the token against the clock before a remote call.
    Check {
        now: DateTime<Utc>,
        refresh_window: Duration,
    },
    /// A new token was issued.
    Authenticated {
        token: String,
        expires_at: DateTime<Utc>,
    },
    /// The session was closed.
    LoggedOut,
}

impl TokenState {
    /// Single transition function of the token lifecycle.
    pub fn transition(self, event: TokenEvent) -> TokenState {
        match (self, event) {
            (_, TokenEvent::Authenticated { token, expires_at }) => {
                TokenState::Valid { token, expires_at }
            }
            (_, TokenEvent::LoggedOut) => TokenState::Unauthenticated,
            (
                TokenState::Valid { token, expires_at }
                | TokenState::NearExpiry { token, expires_at },
                TokenEvent::Check {
                    now,
                    refresh_window,
                },
            ) => {
                if now >= expires_at {
                    TokenState::Expired
                } else if expires_at - now <= refresh_window {
                    TokenState::NearExpiry { token, expires_at }
                } else {
                    TokenState::Valid { token, expires_at }
                }
            }
            (
                state @ (TokenState::Unauthenticated | TokenState::Expired),
                TokenEvent::Check { .. },
            ) => {
                state
            }
        }
    }

    /// Returns the token if it may be sent as-is.
    pub fn usable_token(&self) -> Option<&str> {
        match self {
            TokenState::Valid { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Returns true if a new token must be obtained before the next call.
    pub fn needs_authentication(&self) -> bool {
        self.usable_token().is_none()
    }

    /// Returns the token regardless of expiry, for logout.
    pub fn any_token(&self) -> Option<&str> {
        match self {
            TokenState::Valid { token, .. } | TokenState::NearExpiry { token, .. } => Some(token),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct Claims {
    exp: i64,
}

/// Extracts the `exp` claim of a JWT.
///
/// The signature is not verified; the token only travels back to its issuer.
pub fn decode_expiry(jwt: &str) -> AddonResult<DateTime<Utc>> {
    let malformed = |message: String| AddonError::MalformedToken { message };

    let mut parts = jwt.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed("expected three dot-separated segments".to_string()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| malformed(format!("payload is not base64url: {}", e)))?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| malformed(format!("payload has no usable exp claim: {}", e)))?;

    DateTime::from_timestamp(claims.exp, 0)
        .ok_or_else(|| malformed(format!("exp {} is out of range", claims.exp)))
}

#[cfg(test)]
pub(crate) fn make_jwt(expires_at: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"id":1,"exp":{}}}"#, expires_at.timestamp()));
    format!("{}.{}.signature", header, payload)
}
