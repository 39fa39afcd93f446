//! URL derivation rules: absolute endpoints and realtime (WebSocket) URLs.

use url::Url;

use crate::location::PageUrl;

/// Host of the managed GraphQL service with its own subscription cluster.
pub(crate) const MANAGED_API_HOST: &str = "api.graph.cool";
pub(crate) const MANAGED_DOMAIN: &str = "graph.cool";
pub(crate) const MANAGED_SUBSCRIPTIONS_BASE: &str = "wss://subscriptions.graph.cool/v1";

/// Resolve a root-relative URL against the page origin. Anything else is
/// returned unchanged.
pub fn absolutize(url: &str, origin: &str) -> String {
    if url.starts_with('/') {
        format!("{origin}{url}")
    } else {
        url.to_string()
    }
}

/// Derive the subscription URL for `endpoint` from an optional hint.
///
/// Exactly one rule applies, in priority order:
/// 1. root-relative hint: served from the page host, `wss` when either the
///    endpoint or the page is on https;
/// 2. absolute hint: `http(s)` becomes `ws(s)`, other schemes pass through;
/// 3. no hint: the managed-service subscription URL for managed endpoints,
///    otherwise the endpoint itself with `http(s)` swapped for `ws(s)`.
pub fn derive_realtime_url(endpoint: &str, hint: Option<&str>, page: &PageUrl) -> String {
    match hint.filter(|h| !h.is_empty()) {
        Some(hint) if hint.starts_with('/') => {
            let secure = endpoint.starts_with("https:") || page.is_secure();
            let scheme = if secure { "wss" } else { "ws" };
            format!("{scheme}://{}{hint}", page.host())
        }
        Some(hint) => swap_http_scheme(hint),
        None => swap_http_scheme(&managed_subscription_endpoint(endpoint)),
    }
}

/// `wss://subscriptions.graph.cool/v1/<project>` for managed endpoints,
/// otherwise `endpoint` unchanged.
fn managed_subscription_endpoint(endpoint: &str) -> String {
    if host_of(endpoint).as_deref() == Some(MANAGED_API_HOST) {
        format!("{MANAGED_SUBSCRIPTIONS_BASE}/{}", project_id(endpoint))
    } else {
        endpoint.to_string()
    }
}

/// Replace a leading `http` with `ws`, keeping a trailing `s`.
pub(crate) fn swap_http_scheme(url: &str) -> String {
    match url.strip_prefix("http") {
        Some(rest) => format!("ws{rest}"),
        None => url.to_string(),
    }
}

/// Last `/`-separated segment of an endpoint; by convention the project id
/// on managed and local-development endpoints.
pub fn project_id(endpoint: &str) -> &str {
    endpoint.rsplit('/').next().unwrap_or_default()
}

/// Whether `url` is a usable realtime URL: parses, `ws`/`wss` scheme, has a
/// host.
pub fn is_realtime_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "ws" | "wss") && u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

pub(crate) fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(href: &str) -> PageUrl {
        PageUrl::parse(href).unwrap()
    }

    #[test]
    fn absolutize_root_relative() {
        assert_eq!(absolutize("/graphql", "https://x.com"), "https://x.com/graphql");
    }

    #[test]
    fn absolutize_passes_absolute_through() {
        assert_eq!(absolutize("https://y.com/g", "https://x.com"), "https://y.com/g");
        assert_eq!(absolutize("graphql", "https://x.com"), "graphql");
    }

    #[test]
    fn relative_hint_uses_page_host() {
        let url = derive_realtime_url("http://localhost/graphql", Some("/sub"), &page("http://localhost/"));
        assert_eq!(url, "ws://localhost/sub");
    }

    #[test]
    fn relative_hint_keeps_page_port() {
        let url = derive_realtime_url(
            "http://api.local/graphql",
            Some("/subscriptions"),
            &page("http://localhost:3000/playground"),
        );
        assert_eq!(url, "ws://localhost:3000/subscriptions");
    }

    #[test]
    fn relative_hint_secure_when_endpoint_is_https() {
        let url = derive_realtime_url("https://api.x.com/graphql", Some("/sub"), &page("http://localhost/"));
        assert_eq!(url, "wss://localhost/sub");
    }

    #[test]
    fn relative_hint_secure_when_page_is_https() {
        let url = derive_realtime_url("http://api.x.com/graphql", Some("/sub"), &page("https://play.x.com/"));
        assert_eq!(url, "wss://play.x.com/sub");
    }

    #[test]
    fn absolute_hint_scheme_swapped() {
        let p = page("http://localhost/");
        assert_eq!(
            derive_realtime_url("http://x.com/graphql", Some("https://sub.x.com/ws"), &p),
            "wss://sub.x.com/ws"
        );
        assert_eq!(
            derive_realtime_url("http://x.com/graphql", Some("http://sub.x.com/ws"), &p),
            "ws://sub.x.com/ws"
        );
        assert_eq!(
            derive_realtime_url("http://x.com/graphql", Some("wss://sub.x.com/ws"), &p),
            "wss://sub.x.com/ws"
        );
    }

    #[test]
    fn no_hint_swaps_endpoint_scheme() {
        let p = page("http://localhost/");
        assert_eq!(
            derive_realtime_url("https://api.x.com/graphql", None, &p),
            "wss://api.x.com/graphql"
        );
        assert_eq!(
            derive_realtime_url("http://api.x.com/graphql", Some(""), &p),
            "ws://api.x.com/graphql"
        );
    }

    #[test]
    fn no_hint_managed_endpoint() {
        let url = derive_realtime_url(
            "https://api.graph.cool/simple/v1/cj8abc",
            None,
            &page("http://localhost/"),
        );
        assert_eq!(url, "wss://subscriptions.graph.cool/v1/cj8abc");
    }

    #[test]
    fn project_id_is_last_segment() {
        assert_eq!(project_id("https://api.graph.cool/simple/v1/cj8abc"), "cj8abc");
        assert_eq!(project_id("https://x.com/"), "");
    }

    #[test]
    fn realtime_url_check() {
        assert!(is_realtime_url("ws://localhost:4000/graphql"));
        assert!(is_realtime_url("wss://x.com/sub"));
        assert!(!is_realtime_url("https://x.com/graphql"));
        assert!(!is_realtime_url("/graphql"));
        assert!(!is_realtime_url(""));
    }
}
