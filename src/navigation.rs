use url::Url;

/// Core transition kind for a navigation, as reported by the embedding
/// navigation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageTransition {
    /// User followed a link.
    Link,
    /// User typed the URL into the location bar.
    Typed,
    /// Navigation produced by submitting a form.
    FormSubmit,
    /// Tab reload or session restore.
    Reload,
    /// History traversal (back or forward).
    ForwardBack,
    /// Navigation delivered by another installed application.
    FromExternalApi,
}

impl PageTransition {
    pub fn is_forward_back(self) -> bool {
        matches!(self, PageTransition::ForwardBack)
    }

    pub fn is_from_external_intent(self) -> bool {
        matches!(self, PageTransition::FromExternalApi)
    }
}

/// Immutable description of one navigation attempt, created once per
/// navigation event by the embedder.
///
/// The URL may carry launch metadata the embedder already extracted from
/// an intent-style URL (explicit package, fallback URL, store referrer);
/// those ride along here rather than being re-parsed by the engine.
#[derive(Debug, Clone)]
pub struct NavigationDescriptor {
    pub url: Url,
    pub referrer_url: Option<Url>,
    pub transition: PageTransition,
    pub is_redirect: bool,
    pub has_user_gesture: bool,
    pub is_renderer_initiated: bool,
    pub is_main_frame: bool,
    pub is_incognito: bool,
    pub is_open_in_new_tab: bool,
    pub is_background_tab: bool,
    /// First navigation committed in this frame.
    pub is_initial_navigation_in_frame: bool,
    /// Navigation of another frame's document initiated by this frame.
    pub is_hidden_cross_frame_navigation: bool,
    /// Opaque identity of the initiating origin, if any.
    pub initiator_identity: Option<String>,
    /// Identifies an enclosing installed-web-app wrapper, if any.
    pub native_client_package: Option<String>,
    /// Explicit package named by the target, if the embedder parsed one.
    pub target_package: Option<String>,
    /// Fallback URL supplied alongside the target, if any.
    pub fallback_url: Option<Url>,
    /// Store referrer supplied alongside the target, if any.
    pub market_referrer: Option<String>,
    /// Whether the target carried opaque extras.
    pub has_intent_extras: bool,
    /// Whether the embedding application must be foregrounded for a
    /// launch to be considered.
    pub application_must_be_in_foreground: bool,
    /// Whether background tabs may fire launches for this navigation.
    pub allow_launches_in_background_tabs: bool,
}

impl NavigationDescriptor {
    /// Construct a descriptor for a foreground main-frame link navigation;
    /// callers adjust fields for anything else.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            referrer_url: None,
            transition: PageTransition::Link,
            is_redirect: false,
            has_user_gesture: false,
            is_renderer_initiated: true,
            is_main_frame: true,
            is_incognito: false,
            is_open_in_new_tab: false,
            is_background_tab: false,
            is_initial_navigation_in_frame: false,
            is_hidden_cross_frame_navigation: false,
            initiator_identity: None,
            native_client_package: None,
            target_package: None,
            fallback_url: None,
            market_referrer: None,
            has_intent_extras: false,
            application_must_be_in_foreground: true,
            allow_launches_in_background_tabs: false,
        }
    }

    pub fn is_from_intent(&self) -> bool {
        self.transition.is_from_external_intent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults_to_foreground_link() {
        let descriptor =
            NavigationDescriptor::new(Url::parse("https://example.com/").unwrap());
        assert_eq!(descriptor.transition, PageTransition::Link);
        assert!(descriptor.is_main_frame);
        assert!(!descriptor.is_incognito);
        assert!(descriptor.application_must_be_in_foreground);
    }

    #[test]
    fn external_api_transition_marks_intent() {
        let mut descriptor =
            NavigationDescriptor::new(Url::parse("https://example.com/").unwrap());
        descriptor.transition = PageTransition::FromExternalApi;
        assert!(descriptor.is_from_intent());
        assert!(!descriptor.transition.is_forward_back());
    }
}
