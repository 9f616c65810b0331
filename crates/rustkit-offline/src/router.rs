//! Request routing: which intercepted requests the agent answers, and how.

use std::sync::Arc;

use http::Method;
use tracing::trace;
use url::Url;

use crate::error::OfflineResult;
use crate::manifest::{Manifest, ResourceKey};
use crate::net::FetchRequest;

/// Query marker treated as cache-busting noise.
const VERSION_QUERY: &str = "?v=";

/// Serving policy chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Not a managed resource; let the default network path handle it.
    Passthrough,
    /// Root document: network first, cache on failure.
    OnlineFirst,
    /// Any other manifest resource: cache first, network to fill.
    CacheFirst(ResourceKey),
}

/// Resolve the resource key a URL addresses, or `None` for other origins.
///
/// The key is the URL text after `origin/`, cut at the first `?v=`. The bare
/// origin, `origin/#fragment` and `origin/?v=...` all become `/`.
pub fn resolve_key(origin: &Url, url: &Url) -> Option<ResourceKey> {
    if url.origin() != origin.origin() {
        return None;
    }

    let mut rest = url.path().strip_prefix('/').unwrap_or(url.path()).to_string();
    if let Some(query) = url.query() {
        rest.push('?');
        rest.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        rest.push('#');
        rest.push_str(fragment);
    }

    if rest.starts_with('#') {
        return Some(ResourceKey::root());
    }

    let key = match rest.find(VERSION_QUERY) {
        Some(idx) => &rest[..idx],
        None => rest.as_str(),
    };

    if key.is_empty() {
        Some(ResourceKey::root())
    } else {
        Some(ResourceKey::new(key))
    }
}

/// Absolute URL for a resource key under `origin`.
pub fn resource_url(origin: &Url, key: &ResourceKey) -> OfflineResult<Url> {
    let base = Url::parse(&format!("{}/", origin.origin().ascii_serialization()))?;
    if key.is_root() {
        Ok(base)
    } else {
        Ok(base.join(key.as_str())?)
    }
}

/// Decides per request whether and how the agent intercepts it.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    origin: Url,
    manifest: Arc<Manifest>,
}

impl RequestRouter {
    pub fn new(origin: Url, manifest: Arc<Manifest>) -> Self {
        Self { origin, manifest }
    }

    /// Route a request.
    pub fn route(&self, request: &FetchRequest) -> RouteDecision {
        if request.method != Method::GET {
            return RouteDecision::Passthrough;
        }

        let Some(key) = resolve_key(&self.origin, &request.url) else {
            trace!(url = %request.url, "Cross-origin request, not intercepting");
            return RouteDecision::Passthrough;
        };

        if !self.manifest.contains(&key) {
            trace!(url = %request.url, key = %key, "Not a managed resource");
            return RouteDecision::Passthrough;
        }

        if key.is_root() {
            RouteDecision::OnlineFirst
        } else {
            RouteDecision::CacheFirst(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://app.example.com").unwrap()
    }

    fn key_of(url: &str) -> Option<String> {
        resolve_key(&origin(), &Url::parse(url).unwrap()).map(|k| k.as_str().to_string())
    }

    fn router() -> RequestRouter {
        let manifest = Manifest::from_pairs([
            ("/", "h0"),
            ("index.html", "h0"),
            ("main.js", "h1"),
            ("assets/logo.png", "h2"),
        ]);
        RequestRouter::new(origin(), Arc::new(manifest))
    }

    fn route(url: &str) -> RouteDecision {
        router().route(&FetchRequest::parse(url).unwrap())
    }

    #[test]
    fn test_root_canonicalization() {
        assert_eq!(key_of("https://app.example.com").as_deref(), Some("/"));
        assert_eq!(key_of("https://app.example.com/").as_deref(), Some("/"));
        assert_eq!(key_of("https://app.example.com/#/settings").as_deref(), Some("/"));
        assert_eq!(key_of("https://app.example.com/?v=42").as_deref(), Some("/"));
    }

    #[test]
    fn test_version_query_stripped() {
        assert_eq!(key_of("https://app.example.com/main.js?v=123").as_deref(), Some("main.js"));
        assert_eq!(
            key_of("https://app.example.com/assets/logo.png?v=abc").as_deref(),
            Some("assets/logo.png")
        );
    }

    #[test]
    fn test_other_queries_kept() {
        assert_eq!(key_of("https://app.example.com/main.js?x=1").as_deref(), Some("main.js?x=1"));
        assert_eq!(key_of("https://app.example.com/?lang=en").as_deref(), Some("?lang=en"));
    }

    #[test]
    fn test_cross_origin() {
        assert_eq!(key_of("https://cdn.example.com/main.js"), None);
        assert_eq!(key_of("http://app.example.com/main.js"), None);
    }

    #[test]
    fn test_route_root_is_online_first() {
        assert_eq!(route("https://app.example.com"), RouteDecision::OnlineFirst);
        assert_eq!(route("https://app.example.com/#home"), RouteDecision::OnlineFirst);
        assert_eq!(route("https://app.example.com/"), RouteDecision::OnlineFirst);
    }

    #[test]
    fn test_route_assets_cache_first() {
        assert_eq!(
            route("https://app.example.com/main.js?v=9"),
            RouteDecision::CacheFirst("main.js".into())
        );
        assert_eq!(
            route("https://app.example.com/index.html"),
            RouteDecision::CacheFirst("index.html".into())
        );
    }

    #[test]
    fn test_route_unmanaged_passthrough() {
        assert_eq!(route("https://app.example.com/api/users"), RouteDecision::Passthrough);
        assert_eq!(route("https://app.example.com/main.js?x=1"), RouteDecision::Passthrough);
        assert_eq!(route("https://other.example.com/main.js"), RouteDecision::Passthrough);
    }

    #[test]
    fn test_route_non_get_passthrough() {
        let request = FetchRequest::parse("https://app.example.com/main.js")
            .unwrap()
            .method(Method::POST);
        assert_eq!(router().route(&request), RouteDecision::Passthrough);
    }

    #[test]
    fn test_resource_url() {
        let base = Url::parse("https://app.example.com/some/page").unwrap();
        assert_eq!(
            resource_url(&base, &ResourceKey::root()).unwrap().as_str(),
            "https://app.example.com/"
        );
        assert_eq!(
            resource_url(&base, &"assets/logo.png".into()).unwrap().as_str(),
            "https://app.example.com/assets/logo.png"
        );
    }
}
