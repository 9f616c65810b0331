//! Serving strategies for intercepted requests.

use tracing::{debug, warn};

use crate::cache::{Cache, CachedResponse};
use crate::error::OfflineResult;
use crate::manifest::ResourceKey;
use crate::net::{FetchRequest, FetchResponse, Fetcher};

/// Serve from `cache` when present; otherwise fetch and store ok responses.
///
/// Network failures propagate only when nothing is cached.
pub async fn cache_first(
    cache: &dyn Cache,
    fetcher: &dyn Fetcher,
    key: &ResourceKey,
    request: &FetchRequest,
) -> OfflineResult<FetchResponse> {
    if let Some(entry) = cache.get(key).await? {
        debug!(key = %key, "Cache hit");
        return Ok(FetchResponse::from_cache(&entry));
    }

    debug!(key = %key, url = %request.url, "Cache miss, fetching");
    let response = fetcher.fetch(request).await?;
    if response.ok() {
        cache
            .put(key, CachedResponse::from_response(&response))
            .await?;
    } else {
        debug!(key = %key, status = response.status, "Not caching unsuccessful response");
    }
    Ok(response)
}

/// Fetch first and refresh `cache`; fall back to the cached copy only when
/// the network fails.
pub async fn online_first(
    cache: &dyn Cache,
    fetcher: &dyn Fetcher,
    key: &ResourceKey,
    request: &FetchRequest,
) -> OfflineResult<FetchResponse> {
    match fetcher.fetch(request).await {
        Ok(response) => {
            if response.ok() {
                cache
                    .put(key, CachedResponse::from_response(&response))
                    .await?;
            }
            Ok(response)
        }
        Err(network_error) => match cache.get(key).await {
            Ok(Some(entry)) => {
                warn!(key = %key, error = %network_error, "Network failed, serving cached copy");
                Ok(FetchResponse::from_cache(&entry))
            }
            Ok(None) => Err(network_error),
            Err(storage_error) => {
                warn!(key = %key, error = %storage_error, "Cache lookup failed after network failure");
                Err(network_error)
            }
        },
    }
}
