use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::intent::query_param;

/// Host-suffix / query-parameter pair that forces a navigation to stay
/// in the browser when both match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StayInBrowserException {
    pub host_suffix: String,
    pub query_param: String,
}

/// Where store redirects go and how listing URLs are recognized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Host of web store listing pages.
    pub listing_host: String,
    /// Path of web store listing pages.
    pub listing_path: String,
    /// Query parameter naming the listed package.
    pub package_param: String,
    /// Query parameter carrying the referrer credit.
    pub referrer_param: String,
    /// Package identity of the store application itself.
    pub store_package: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            listing_host: "play.google.com".into(),
            listing_path: "/store/apps/details".into(),
            package_param: "id".into(),
            referrer_param: "referrer".into(),
            store_package: "com.android.vending".into(),
        }
    }
}

impl StoreSettings {
    /// Package listed by `url` when it is a web store listing page.
    pub fn listed_package(&self, url: &Url) -> Option<String> {
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        if url.host_str() != Some(self.listing_host.as_str())
            || url.path() != self.listing_path
        {
            return None;
        }
        query_param(url, &self.package_param)
    }

    /// Referrer named by a listing `url`, if any.
    pub fn listed_referrer(&self, url: &Url) -> Option<String> {
        query_param(url, &self.referrer_param)
    }
}

/// Runtime policy knobs for the navigation gatekeeper. Persisted as JSON
/// next to the rest of the embedder's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperSettings {
    /// Kill switch: never leave the browser.
    pub disable_external_intents: bool,
    /// Consider handlers registered with non-default filters when the
    /// chain started from an external intent.
    pub match_non_default_handlers: bool,
    /// Custom scheme owned by the embedding browser, if it has one.
    pub self_scheme: Option<String>,
    /// Schemes the browser renders itself.
    pub browser_schemes: Vec<String>,
    /// Schemes reserved for browser-internal surfaces; never launchable
    /// and never valid as a fallback.
    pub internal_schemes: Vec<String>,
    pub store: StoreSettings,
    /// Navigations matching one of these always stay in the browser.
    pub stay_in_browser_exceptions: Vec<StayInBrowserException>,
}

impl Default for GatekeeperSettings {
    fn default() -> Self {
        Self {
            disable_external_intents: false,
            match_non_default_handlers: false,
            self_scheme: None,
            browser_schemes: default_browser_schemes(),
            internal_schemes: default_internal_schemes(),
            store: StoreSettings::default(),
            stay_in_browser_exceptions: default_exceptions(),
        }
    }
}

fn default_browser_schemes() -> Vec<String> {
    ["http", "https", "file", "blob", "data", "about"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_internal_schemes() -> Vec<String> {
    ["about", "chrome", "devtools"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_exceptions() -> Vec<StayInBrowserException> {
    // Device pairing links must complete in the tab that showed the code.
    vec![StayInBrowserException {
        host_suffix: "youtube.com".into(),
        query_param: "pairingCode".into(),
    }]
}

impl GatekeeperSettings {
    pub fn is_browser_scheme(&self, scheme: &str) -> bool {
        self.browser_schemes.iter().any(|s| s == scheme)
    }

    pub fn is_internal_scheme(&self, scheme: &str) -> bool {
        self.internal_schemes.iter().any(|s| s == scheme)
    }

    /// Whether `url` matches a configured stay-in-browser exception.
    pub fn matches_stay_exception(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        self.stay_in_browser_exceptions.iter().any(|exception| {
            host_matches_suffix(host, &exception.host_suffix)
                && query_param(url, &exception.query_param).is_some()
        })
    }

    /// Load settings from disk, writing defaults if missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Unable to read config at {}", path.display()))?;
            let parsed: Self = serde_json::from_str(&raw)
                .with_context(|| format!("Malformed config at {}", path.display()))?;
            Ok(parsed)
        } else {
            let settings = Self::default();
            settings.save(path)?;
            Ok(settings)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        let serialised = serde_json::to_string_pretty(self)?;
        fs::write(path, serialised)
            .with_context(|| format!("Failed to persist config to {}", path.display()))
    }

    /// Platform default location for the settings file.
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "linkgate", "Linkgate")
            .context("Unable to resolve platform config directory")?;
        Ok(dirs.config_dir().join("gatekeeper.json"))
    }
}

/// Whether `host` equals `suffix` or ends with `.suffix`.
fn host_matches_suffix(host: &str, suffix: &str) -> bool {
    host == suffix
        || (host.len() > suffix.len()
            && host.ends_with(suffix)
            && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_classification() {
        let settings = GatekeeperSettings::default();
        assert!(settings.is_browser_scheme("https"));
        assert!(settings.is_internal_scheme("chrome"));
        assert!(!settings.is_browser_scheme("market"));
    }

    #[test]
    fn store_listing_detection() {
        let store = StoreSettings::default();
        let listing =
            Url::parse("https://play.google.com/store/apps/details?id=com.app&referrer=r")
                .unwrap();
        assert_eq!(store.listed_package(&listing).as_deref(), Some("com.app"));
        assert_eq!(store.listed_referrer(&listing).as_deref(), Some("r"));

        let not_listing = Url::parse("https://play.google.com/store/search?q=x").unwrap();
        assert!(store.listed_package(&not_listing).is_none());

        let wrong_scheme =
            Url::parse("ftp://play.google.com/store/apps/details?id=com.app").unwrap();
        assert!(store.listed_package(&wrong_scheme).is_none());
    }

    #[test]
    fn stay_exception_requires_suffix_and_param() {
        let settings = GatekeeperSettings::default();
        let paired = Url::parse("https://www.youtube.com/tv?pairingCode=abc").unwrap();
        assert!(settings.matches_stay_exception(&paired));

        let no_param = Url::parse("https://www.youtube.com/tv").unwrap();
        assert!(!settings.matches_stay_exception(&no_param));

        let lookalike = Url::parse("https://notyoutube.com/tv?pairingCode=abc").unwrap();
        assert!(!settings.matches_stay_exception(&lookalike));
    }

    #[test]
    fn config_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gatekeeper.json");

        let loaded = GatekeeperSettings::load_or_default(&path).unwrap();
        assert!(path.exists());
        assert!(!loaded.disable_external_intents);

        let mut edited = loaded;
        edited.disable_external_intents = true;
        edited.self_scheme = Some("mybrowser".into());
        edited.save(&path).unwrap();

        let reloaded = GatekeeperSettings::load_or_default(&path).unwrap();
        assert!(reloaded.disable_external_intents);
        assert_eq!(reloaded.self_scheme.as_deref(), Some("mybrowser"));
    }
}
