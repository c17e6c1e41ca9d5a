use tracing::debug;
use url::Url;

use crate::config::GatekeeperSettings;
use crate::navigation::NavigationDescriptor;

/// Marker the self scheme uses to wrap a browser navigation, as in
/// `<scheme>://navigate?url=https://example.com/`.
pub const SELF_SCHEME_NAVIGATE_PREFIX: &str = "://navigate?url=";

/// Normalized description of the launch candidate derived from one
/// navigation attempt. This is what resolver queries and launches are
/// keyed on for the rest of the decision.
#[derive(Debug, Clone)]
pub struct TargetIntent {
    /// The URL the launch would carry. Self-scheme wrappers are already
    /// unwrapped here.
    pub url: Url,
    /// Explicit owning package named by the target, if any.
    pub package: Option<String>,
    /// Browser-renderable fallback; anything but http/https is dropped.
    pub fallback_url: Option<Url>,
    /// Referrer to forward on a store redirect.
    pub market_referrer: Option<String>,
    /// Whether the original target carried opaque extras.
    pub has_extras: bool,
}

impl TargetIntent {
    /// Build the launch candidate for a navigation, unwrapping the self
    /// scheme and validating the fallback URL.
    pub fn from_descriptor(
        descriptor: &NavigationDescriptor,
        settings: &GatekeeperSettings,
    ) -> Self {
        let url = match unwrap_self_scheme_url(settings.self_scheme.as_deref(), &descriptor.url)
        {
            Some(inner) => {
                debug!(target = %inner, "unwrapped self-scheme navigation");
                inner
            }
            None => descriptor.url.clone(),
        };

        let fallback_url = descriptor.fallback_url.clone().filter(|fallback| {
            let ok = matches!(fallback.scheme(), "http" | "https");
            if !ok {
                debug!(fallback = %fallback, "dropping non-web fallback URL");
            }
            ok
        });

        Self {
            url,
            package: descriptor.target_package.clone(),
            fallback_url,
            market_referrer: descriptor.market_referrer.clone(),
            has_extras: descriptor.has_intent_extras,
        }
    }

    /// Sanitized scheme of the target URL.
    pub fn scheme(&self) -> String {
        sanitized_url_scheme(self.url.as_str()).unwrap_or_default()
    }
}

/// Unwrap `<self-scheme>://navigate?url=...` into the inner URL. Only
/// http/https survive the unwrap; everything else is rejected.
pub fn unwrap_self_scheme_url(self_scheme: Option<&str>, url: &Url) -> Option<Url> {
    let scheme = self_scheme?.to_ascii_lowercase();
    let prefix = format!("{scheme}{SELF_SCHEME_NAVIGATE_PREFIX}");
    let spec = url.as_str();
    if !spec.to_ascii_lowercase().starts_with(&prefix) {
        return None;
    }
    let mut inner = spec[prefix.len()..].to_string();
    if inner.is_empty() {
        return None;
    }
    if sanitized_url_scheme(&inner).is_none() {
        // No scheme specified, assume http.
        inner = format!("http://{inner}");
    }
    let parsed = Url::parse(&inner).ok()?;
    matches!(parsed.scheme(), "http" | "https").then_some(parsed)
}

/// Parse the scheme out of a URL string, trimming and stripping unsafe
/// characters so sneaky schemes like "java  script" cannot dodge
/// classification. Returns `None` when no scheme is present.
pub fn sanitized_url_scheme(url: &str) -> Option<String> {
    let colon = url.find(':')?;
    let raw = url[..colon].to_ascii_lowercase();
    let scheme: String = raw
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '+' | '.'))
        .collect();
    if scheme.is_empty() {
        return None;
    }
    Some(scheme)
}

/// Value of a query parameter, if present.
pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_lookalike_schemes() {
        assert_eq!(
            sanitized_url_scheme("java script:alert(1)").as_deref(),
            Some("javascript")
        );
        assert_eq!(sanitized_url_scheme("j$a$r:foo").as_deref(), Some("jar"));
        assert_eq!(sanitized_url_scheme("no-scheme-here"), None);
    }

    #[test]
    fn unwraps_self_scheme_navigate_urls() {
        let url = Url::parse("mybrowser://navigate?url=https://example.com/page").unwrap();
        let inner = unwrap_self_scheme_url(Some("mybrowser"), &url).unwrap();
        assert_eq!(inner.as_str(), "https://example.com/page");
    }

    #[test]
    fn self_scheme_unwrap_is_case_insensitive_on_configured_scheme() {
        let url = Url::parse("mybrowser://navigate?url=https://example.com/page").unwrap();
        let inner = unwrap_self_scheme_url(Some("MyBrowser"), &url).unwrap();
        assert_eq!(inner.as_str(), "https://example.com/page");
    }

    #[test]
    fn self_scheme_unwrap_rejects_non_web_targets() {
        let url = Url::parse("mybrowser://navigate?url=file:///etc/passwd").unwrap();
        assert!(unwrap_self_scheme_url(Some("mybrowser"), &url).is_none());
    }

    #[test]
    fn self_scheme_unwrap_assumes_http_without_scheme() {
        let url = Url::parse("mybrowser://navigate?url=example.com/page").unwrap();
        let inner = unwrap_self_scheme_url(Some("mybrowser"), &url).unwrap();
        assert_eq!(inner.scheme(), "http");
    }

    #[test]
    fn fallback_must_be_web_renderable() {
        let settings = GatekeeperSettings::default();
        let mut descriptor = crate::navigation::NavigationDescriptor::new(
            Url::parse("externalapp://open").unwrap(),
        );
        descriptor.fallback_url = Some(Url::parse("intent://evil").unwrap());
        let target = TargetIntent::from_descriptor(&descriptor, &settings);
        assert!(target.fallback_url.is_none());

        descriptor.fallback_url = Some(Url::parse("https://example.com/").unwrap());
        let target = TargetIntent::from_descriptor(&descriptor, &settings);
        assert!(target.fallback_url.is_some());
    }

    #[test]
    fn query_param_lookup() {
        let url = Url::parse("https://store.example/details?id=com.app&referrer=x").unwrap();
        assert_eq!(query_param(&url, "id").as_deref(), Some("com.app"));
        assert_eq!(query_param(&url, "missing"), None);
    }
}
