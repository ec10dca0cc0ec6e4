use crate::config::UpstreamsConfig;
use url::Url;

/// A named origin that requests are forwarded to.
#[derive(Clone, Debug)]
pub struct Upstream {
    name: &'static str,
    base: Url,
}

impl Upstream {
    pub fn new(name: &'static str, base: Url) -> Self {
        Self { name, base }
    }

    /// Identifier used in logs, metrics and error messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Full target URL for a prefix-stripped path (query included).
    pub fn url_for(&self, path_and_query: &str) -> String {
        join_path(self.base.as_str(), path_and_query)
    }
}

/// The primary/secondary pair, in attempt order.
#[derive(Clone, Debug)]
pub struct Upstreams {
    pub primary: Upstream,
    pub secondary: Upstream,
}

impl From<&UpstreamsConfig> for Upstreams {
    fn from(config: &UpstreamsConfig) -> Self {
        Self {
            primary: Upstream::new("primary", config.primary.clone()),
            secondary: Upstream::new("secondary", config.secondary.clone()),
        }
    }
}

/// Joins `path` onto `base` with exactly one separating slash, whatever
/// slashes either side already carries.
pub fn join_path(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
