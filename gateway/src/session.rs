//! Session credential resolution.
//!
//! The identity integration issues a signed session cookie after login. The
//! cookie value is `<payload>.<signature>` where `payload` is the unpadded
//! URL-safe base64 of the JSON [`SessionClaims`] and `signature` is the
//! unpadded URL-safe base64 of `HMAC-SHA256(secret, payload)`.
//!
//! Resolution never fails a request: anything that does not verify is treated
//! as an anonymous caller.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use http::header::COOKIE;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::SessionConfig;

type HmacSha256 = Hmac<Sha256>;

/// Credential of an authenticated caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credential {
    /// Identity-provider subject of the user
    pub subject: Option<String>,
    pub id_token: Option<String>,
    pub access_token: Option<String>,
}

impl Credential {
    /// Token forwarded as `Authorization: Bearer`. The identity token wins over
    /// the access token on every route.
    pub fn bearer_token(&self) -> Option<&str> {
        non_empty(&self.id_token).or_else(|| non_empty(&self.access_token))
    }

    pub fn subject(&self) -> Option<&str> {
        non_empty(&self.subject)
    }

    fn is_empty(&self) -> bool {
        self.subject().is_none() && self.bearer_token().is_none()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl From<SessionClaims> for Credential {
    fn from(claims: SessionClaims) -> Self {
        Self {
            subject: claims.sub,
            id_token: claims.id_token,
            access_token: claims.access_token,
        }
    }
}

/// Resolves the caller's credential from request headers.
///
/// Implementations return `None` for anonymous callers and for any
/// credential that cannot be verified.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Credential>;
}

/// Claims carried inside the session cookie.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Expiry as unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("session value is not of the form <payload>.<signature>")]
    Malformed,
    #[error("invalid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("invalid signing key")]
    InvalidKey,
    #[error("signature mismatch")]
    BadSignature,
    #[error("invalid claims: {0}")]
    Claims(#[from] serde_json::Error),
    #[error("session expired at {0}")]
    Expired(u64),
}

/// Signs and verifies session cookie values.
pub struct SessionCodec {
    secret: Vec<u8>,
}

impl SessionCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256, SessionError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SessionError::InvalidKey)?;
        mac.update(payload);
        Ok(mac)
    }

    pub fn encode(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signature = self.mac(payload.as_bytes())?.finalize().into_bytes();
        Ok(format!("{payload}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Verifies `value` and returns its claims. `now` is unix seconds.
    pub fn decode(&self, value: &str, now: u64) -> Result<SessionClaims, SessionError> {
        let (payload, signature) = value.split_once('.').ok_or(SessionError::Malformed)?;
        let signature = URL_SAFE_NO_PAD.decode(signature)?;

        self.mac(payload.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| SessionError::BadSignature)?;

        let claims: SessionClaims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;

        match claims.exp {
            Some(exp) if exp <= now => Err(SessionError::Expired(exp)),
            _ => Ok(claims),
        }
    }
}

/// Reads the session cookie and verifies it with the shared secret.
pub struct SessionCookieResolver {
    codec: SessionCodec,
    cookie_name: String,
}

impl SessionCookieResolver {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            codec: SessionCodec::new(&config.secret),
            cookie_name: config.cookie_name.clone(),
        }
    }

    fn resolve_at(&self, headers: &HeaderMap, now: u64) -> Option<Credential> {
        let value = find_cookie(headers, &self.cookie_name)?;

        let claims = match self.codec.decode(value, now) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "discarding session cookie");
                return None;
            }
        };

        let credential = Credential::from(claims);
        if credential.is_empty() {
            tracing::debug!("session cookie carries no subject or token");
            return None;
        }
        Some(credential)
    }
}

#[async_trait]
impl CredentialResolver for SessionCookieResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Credential> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.resolve_at(headers, now)
    }
}

/// Finds a cookie by name across all `Cookie` headers.
fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}
