use http::Method;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const PRIMARY_URL_ENV: &str = "API_BASE_URL_PRIMARY";
pub const SECONDARY_URL_ENV: &str = "API_BASE_URL_SECONDARY";
pub const SESSION_SECRET_ENV: &str = "SESSION_SECRET";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Route prefix must start and end with '/': {0}")]
    InvalidRoutePrefix(String),

    #[error("Route path must start with '/' and lie under the route prefix: {0}")]
    InvalidRoutePath(String),

    #[error("Primary and secondary upstream must differ")]
    DuplicateUpstream,

    #[error("Upstream URL must use http or https: {0}")]
    InvalidUpstreamScheme(Url),

    #[error("Session secret cannot be empty")]
    EmptySessionSecret,

    #[error("Session cookie name cannot be empty")]
    EmptyCookieName,
}

#[derive(Error, Debug)]
pub enum EnvOverrideError {
    #[error("invalid URL in {var}: {source}")]
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },
}

/// HTTP methods the gateway forwards
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    /// GET and HEAD requests are forwarded without a body.
    pub fn carries_body(self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl TryFrom<&Method> for HttpMethod {
    type Error = ();

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        match *method {
            Method::GET => Ok(HttpMethod::Get),
            Method::HEAD => Ok(HttpMethod::Head),
            Method::POST => Ok(HttpMethod::Post),
            Method::PUT => Ok(HttpMethod::Put),
            Method::PATCH => Ok(HttpMethod::Patch),
            Method::DELETE => Ok(HttpMethod::Delete),
            Method::OPTIONS => Ok(HttpMethod::Options),
            _ => Err(()),
        }
    }
}

impl PartialEq<Method> for HttpMethod {
    fn eq(&self, other: &Method) -> bool {
        HttpMethod::try_from(other).is_ok_and(|m| m == *self)
    }
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming requests
    pub listener: Listener,
    /// Admin listener for health and readiness
    pub admin_listener: Listener,
    /// Local prefix stripped before forwarding, e.g. "/api/"
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
    pub upstreams: UpstreamsConfig,
    pub session: SessionConfig,
    /// Request routing rules. In-prefix requests that match none are forwarded.
    #[serde(default)]
    pub routes: Vec<Route>,
}

fn default_route_prefix() -> String {
    "/api/".to_string()
}

impl Config {
    /// Validates the gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if !self.route_prefix.starts_with('/') || !self.route_prefix.ends_with('/') {
            return Err(ValidationError::InvalidRoutePrefix(
                self.route_prefix.clone(),
            ));
        }

        self.upstreams.validate()?;
        self.session.validate()?;

        let bare_prefix = self.route_prefix.trim_end_matches('/');
        for route in &self.routes {
            let path = &route.r#match.path;
            if !path.starts_with(&self.route_prefix) && path != bare_prefix {
                return Err(ValidationError::InvalidRoutePath(path.clone()));
            }
        }

        Ok(())
    }

    /// Overrides upstream URLs and the session secret from the environment.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a closure.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), EnvOverrideError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |var: &'static str, value: String| {
            Url::parse(&value).map_err(|source| EnvOverrideError::InvalidUrl { var, source })
        };

        if let Some(primary) = lookup(PRIMARY_URL_ENV) {
            self.upstreams.primary = parse(PRIMARY_URL_ENV, primary)?;
        }
        if let Some(secondary) = lookup(SECONDARY_URL_ENV) {
            self.upstreams.secondary = parse(SECONDARY_URL_ENV, secondary)?;
        }
        if let Some(secret) = lookup(SESSION_SECRET_ENV) {
            self.session.secret = secret;
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// The two origins requests are forwarded to
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamsConfig {
    /// Tried first for every request
    pub primary: Url,
    /// Tried once when the primary fails with a 5xx or a transport error
    pub secondary: Url,
    /// Bound on each attempt. Unset means attempts wait indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl UpstreamsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for url in [&self.primary, &self.secondary] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ValidationError::InvalidUpstreamScheme(url.clone()));
            }
        }
        if self.primary == self.secondary {
            return Err(ValidationError::DuplicateUpstream);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Session cookie settings shared with the identity integration
#[derive(Clone, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// HMAC key the session cookie is signed with
    pub secret: String,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

fn default_cookie_name() -> String {
    "retail.session-token".to_string()
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.secret.is_empty() {
            return Err(ValidationError::EmptySessionSecret);
        }
        if self.cookie_name.is_empty() {
            return Err(ValidationError::EmptyCookieName);
        }
        Ok(())
    }
}

// Keeps the secret out of logs.
impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

/// Routing rule configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Route {
    /// Conditions for matching incoming requests
    pub r#match: Match,
    /// Action to take when the match conditions are met
    pub action: RouteAction,
}

/// Request matching criteria
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Match {
    /// Full inbound path, prefix included (e.g., "/api/orders/list")
    pub path: String,
    /// Optional HTTP method to match
    pub method: Option<HttpMethod>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    /// Forward with the caller's credential if there is one
    #[default]
    Forward,
    /// Refuse with 401 unless the caller has a session credential
    Authenticated,
}

impl RouteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteAction::Forward => "forward",
            RouteAction::Authenticated => "authenticated",
        }
    }
}
