use crate::config::{Route, RouteAction};
use hyper::{Method, Uri};
use std::sync::Arc;

/// Where a request goes once it has been matched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteDecision {
    pub action: RouteAction,
    /// Inbound path with the route prefix stripped, query preserved
    pub upstream_path: String,
}

/// Matches incoming requests against the route prefix and configured routes
#[derive(Clone)]
pub struct Router {
    prefix: Arc<str>,
    routes: Arc<Vec<Route>>,
}

impl Router {
    pub fn new(prefix: &str, routes: Vec<Route>) -> Self {
        Self {
            prefix: Arc::from(prefix),
            routes: Arc::new(routes),
        }
    }

    /// Returns `None` when the path lies outside the route prefix.
    pub fn route(&self, method: &Method, uri: &Uri) -> Option<RouteDecision> {
        let path = uri.path();
        let stripped = self.strip_prefix(path)?;

        let action = self
            .routes
            .iter()
            .find(|route| matches_route(method, path, route))
            .map(|route| route.action)
            .unwrap_or_default();

        let upstream_path = match uri.query() {
            Some(query) => format!("{stripped}?{query}"),
            None => stripped.to_string(),
        };

        tracing::debug!(action = action.as_str(), %upstream_path, "matched route");
        Some(RouteDecision {
            action,
            upstream_path,
        })
    }

    fn strip_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        if let Some(rest) = path.strip_prefix(&*self.prefix) {
            return Some(rest);
        }
        // "/api" itself addresses the upstream root
        (path == self.prefix.trim_end_matches('/')).then_some("")
    }
}

fn matches_route(method: &Method, path: &str, route: &Route) -> bool {
    if path.trim_end_matches('/') != route.r#match.path.trim_end_matches('/') {
        return false;
    }

    if let Some(expected_method) = &route.r#match.method
        && expected_method != method
    {
        return false;
    }

    true
}
