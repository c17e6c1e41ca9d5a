use std::collections::HashSet;
use std::time::{Duration, Instant};

use once_cell::unsync::OnceCell;
use tracing::debug;

use crate::intent::TargetIntent;
use crate::navigation::PageTransition;
use crate::resolver::HandlerDescriptor;

/// How long a navigation chain may keep launching apps after it starts.
/// Mirrors the transient user activation window so an unattended tab
/// cannot redirect into an app launch arbitrarily far in the future.
pub const NAVIGATION_CHAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Snapshot of how the current chain started. Never mutated after the
/// chain begins.
#[derive(Debug, Clone, Copy)]
pub struct InitialNavigationState {
    pub is_renderer_initiated: bool,
    pub has_user_gesture: bool,
    pub is_from_reload: bool,
    pub is_from_typing: bool,
    pub is_from_form_submit: bool,
    pub is_from_intent: bool,
}

impl InitialNavigationState {
    fn from_transition(
        transition: PageTransition,
        has_user_gesture: bool,
        is_renderer_initiated: bool,
    ) -> Self {
        Self {
            is_renderer_initiated,
            has_user_gesture,
            is_from_reload: transition == PageTransition::Reload,
            is_from_typing: transition == PageTransition::Typed,
            is_from_form_submit: transition == PageTransition::FormSubmit,
            is_from_intent: transition.is_from_external_intent(),
        }
    }
}

/// The external intent that started the current chain, when there is one.
/// Replaced wholesale when a new chain starts from another intent and
/// discarded when a chain starts from anything else.
#[derive(Debug)]
pub struct IntentState {
    /// Target the initiating intent described.
    pub initial_target: TargetIntent,
    /// The intent explicitly asked to stay in this browser.
    pub prefers_to_stay_in_browser: bool,
    /// The intent came from a trusted same-app custom tab session.
    pub is_custom_tab: bool,
    /// The OS task was freshly created for this intent.
    pub external_intent_started_task: bool,
    /// Handler identities for the initial target, computed on first use.
    cached_resolvers: OnceCell<HashSet<String>>,
}

impl IntentState {
    pub fn new(initial_target: TargetIntent) -> Self {
        Self {
            initial_target,
            prefers_to_stay_in_browser: false,
            is_custom_tab: false,
            external_intent_started_task: false,
            cached_resolvers: OnceCell::new(),
        }
    }

    fn initial_resolvers<F>(&self, resolve: F) -> &HashSet<String>
    where
        F: FnOnce(&TargetIntent) -> Vec<HandlerDescriptor>,
    {
        self.cached_resolvers.get_or_init(|| {
            resolve(&self.initial_target)
                .into_iter()
                .map(|handler| handler.owner)
                .collect()
        })
    }
}

/// Mutable chain-scoped state. Exactly one of these is live per
/// [`RedirectChain`]; it is replaced atomically when a new chain starts.
#[derive(Debug)]
struct NavigationChainState {
    initial: InitialNavigationState,
    started_at: Instant,
    is_first_hop: bool,
    /// Latched by the engine when further hops of this chain must not
    /// leave the browser (e.g. after a fallback URL load).
    should_not_override: bool,
    /// One-shot latch suppressing the above for the next fallback
    /// handling pass. Cleared on read.
    should_not_block_override: bool,
    used_back_or_forward: bool,
    performed_hidden_cross_frame_navigation: bool,
    /// History index to roll back to if this chain gets clobbered.
    rollback_entry_index: i64,
}

/// Tracks one logical sequence of navigations and redirects from its
/// first hop, exposing the chain-scoped flags the decision engine
/// consumes and latches.
#[derive(Debug, Default)]
pub struct RedirectChain {
    state: Option<NavigationChainState>,
    intent_state: Option<IntentState>,
}

impl RedirectChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the intent that is about to start a chain. Must be called
    /// before the corresponding `update_new_url_loading`.
    pub fn set_intent_state(&mut self, intent_state: IntentState) {
        self.intent_state = Some(intent_state);
    }

    /// Drop all chain state, e.g. when the tab is reused for an
    /// unrelated navigation.
    pub fn clear(&mut self) {
        self.state = None;
        self.intent_state = None;
    }

    /// Feed one navigation or redirect event into the state machine.
    ///
    /// The event continues the current chain when it is a redirect or a
    /// renderer-initiated navigation without a gesture; anything else
    /// starts a new chain and snapshots a fresh
    /// [`InitialNavigationState`].
    pub fn update_new_url_loading(
        &mut self,
        transition: PageTransition,
        is_redirect: bool,
        has_user_gesture: bool,
        is_initial_navigation: bool,
        is_renderer_initiated: bool,
        last_committed_index: i64,
        now: Instant,
    ) {
        if is_redirect || (is_renderer_initiated && !has_user_gesture) {
            if let Some(state) = self.state.as_mut() {
                state.is_first_hop = false;
                if transition.is_forward_back() {
                    state.used_back_or_forward = true;
                }
                return;
            }
        }

        if !transition.is_from_external_intent() {
            // A fresh chain from anything but an intent invalidates any
            // pending intent state.
            self.intent_state = None;
        }

        debug!(
            ?transition,
            is_renderer_initiated, has_user_gesture, "starting new navigation chain"
        );
        self.state = Some(NavigationChainState {
            initial: InitialNavigationState::from_transition(
                transition,
                has_user_gesture,
                is_renderer_initiated,
            ),
            started_at: now,
            is_first_hop: !is_initial_navigation,
            should_not_override: false,
            should_not_block_override: false,
            used_back_or_forward: transition.is_forward_back(),
            performed_hidden_cross_frame_navigation: false,
            rollback_entry_index: last_committed_index,
        });
    }

    pub fn is_on_navigation(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_on_first_load_in_chain(&self) -> bool {
        self.state().is_some_and(|state| state.is_first_hop)
    }

    /// Snapshot of how the chain started. `None` when no chain is live,
    /// which is a caller contract violation.
    pub fn initial_navigation_state(&self) -> Option<InitialNavigationState> {
        self.state().map(|state| state.initial)
    }

    /// Whether the chain has outlived the launch window.
    pub fn is_navigation_chain_expired(&self, now: Instant) -> bool {
        self.state()
            .is_some_and(|state| now.duration_since(state.started_at) > NAVIGATION_CHAIN_TIMEOUT)
    }

    /// Whether the handler set for the current target differs from the
    /// handlers that matched the chain's initiating intent. A redirect
    /// that surfaces a new handler no longer "belongs" to the app the
    /// user originally chose.
    pub fn has_new_resolver<F>(&self, current: &[HandlerDescriptor], resolve_initial: F) -> bool
    where
        F: FnOnce(&TargetIntent) -> Vec<HandlerDescriptor>,
    {
        let Some(intent_state) = &self.intent_state else {
            return !current.is_empty();
        };
        let initial = intent_state.initial_resolvers(resolve_initial);
        current
            .iter()
            .any(|handler| !initial.contains(handler.owner.as_str()))
    }

    pub fn intent_prefers_to_stay_in_browser(&self) -> bool {
        self.intent_state
            .as_ref()
            .is_some_and(|intent| intent.prefers_to_stay_in_browser)
    }

    pub fn is_from_custom_tab_intent(&self) -> bool {
        self.intent_state
            .as_ref()
            .is_some_and(|intent| intent.is_custom_tab)
    }

    pub fn was_task_started_by_external_intent(&self) -> bool {
        self.intent_state
            .as_ref()
            .is_some_and(|intent| intent.external_intent_started_task)
    }

    /// Whether the chain began from an external intent and has moved
    /// past its first hop.
    pub fn is_noninitial_load_in_intent_chain(&self) -> bool {
        self.state().is_some_and(|state| {
            state.initial.is_from_intent && !state.is_first_hop
        })
    }

    pub fn navigation_chain_used_back_or_forward(&self) -> bool {
        self.state().is_some_and(|state| state.used_back_or_forward)
    }

    pub fn set_performed_hidden_cross_frame_navigation(&mut self) {
        if let Some(state) = self.state_mut() {
            state.performed_hidden_cross_frame_navigation = true;
        }
    }

    pub fn performed_hidden_cross_frame_navigation(&self) -> bool {
        self.state()
            .is_some_and(|state| state.performed_hidden_cross_frame_navigation)
    }

    /// Latch: no further hop of this chain may leave the browser.
    pub fn set_should_not_override_url_loading(&mut self) {
        if let Some(state) = self.state_mut() {
            state.should_not_override = true;
        }
    }

    pub fn should_not_override_url_loading(&self) -> bool {
        self.state().is_some_and(|state| state.should_not_override)
    }

    /// One-shot latch: the next fallback handling pass must not set the
    /// `should_not_override` latch.
    pub fn set_should_not_block_override_on_current_chain(&mut self) {
        if let Some(state) = self.state_mut() {
            state.should_not_block_override = true;
        }
    }

    /// Consume the one-shot latch.
    pub fn take_should_not_block_override(&mut self) -> bool {
        match self.state_mut() {
            Some(state) => std::mem::take(&mut state.should_not_block_override),
            None => false,
        }
    }

    /// History index recorded when the chain started.
    pub fn rollback_entry_index(&self) -> Option<i64> {
        self.state().map(|state| state.rollback_entry_index)
    }

    fn state(&self) -> Option<&NavigationChainState> {
        debug_assert!(
            self.state.is_some(),
            "chain-scoped query with no live navigation chain"
        );
        self.state.as_ref()
    }

    fn state_mut(&mut self) -> Option<&mut NavigationChainState> {
        debug_assert!(
            self.state.is_some(),
            "chain-scoped mutation with no live navigation chain"
        );
        self.state.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::HandlerFilter;
    use url::Url;

    fn start_chain(chain: &mut RedirectChain, transition: PageTransition, now: Instant) {
        chain.update_new_url_loading(transition, false, true, false, false, 0, now);
    }

    fn handler(owner: &str) -> HandlerDescriptor {
        HandlerDescriptor {
            owner: owner.into(),
            filter: Some(HandlerFilter {
                hosts: vec!["video.example".into()],
                paths: vec![],
            }),
            is_exported: true,
        }
    }

    fn target() -> TargetIntent {
        TargetIntent {
            url: Url::parse("https://video.example/").unwrap(),
            package: None,
            fallback_url: None,
            market_referrer: None,
            has_extras: false,
        }
    }

    #[test]
    fn redirect_continues_chain() {
        let mut chain = RedirectChain::new();
        let t0 = Instant::now();
        start_chain(&mut chain, PageTransition::Link, t0);
        assert!(chain.is_on_first_load_in_chain());

        chain.update_new_url_loading(PageTransition::Link, true, false, false, true, 1, t0);
        assert!(chain.is_on_navigation());
        assert!(!chain.is_on_first_load_in_chain());
    }

    #[test]
    fn gesture_navigation_starts_new_chain() {
        let mut chain = RedirectChain::new();
        let t0 = Instant::now();
        start_chain(&mut chain, PageTransition::Link, t0);
        chain.set_should_not_override_url_loading();
        assert!(chain.should_not_override_url_loading());

        // A fresh user-driven navigation resets the sticky flags.
        chain.update_new_url_loading(PageTransition::Link, false, true, false, true, 2, t0);
        assert!(!chain.should_not_override_url_loading());
        assert!(chain.is_on_first_load_in_chain());
        assert_eq!(chain.rollback_entry_index(), Some(2));
    }

    #[test]
    fn renderer_navigation_without_gesture_continues_chain() {
        let mut chain = RedirectChain::new();
        let t0 = Instant::now();
        start_chain(&mut chain, PageTransition::Link, t0);
        chain.set_should_not_override_url_loading();

        chain.update_new_url_loading(PageTransition::Link, false, false, false, true, 2, t0);
        assert!(chain.should_not_override_url_loading());
    }

    #[test]
    fn back_forward_flag_is_sticky_for_chain_lifetime() {
        let mut chain = RedirectChain::new();
        let t0 = Instant::now();
        start_chain(&mut chain, PageTransition::ForwardBack, t0);
        assert!(chain.navigation_chain_used_back_or_forward());

        chain.update_new_url_loading(PageTransition::Link, true, false, false, true, 1, t0);
        assert!(chain.navigation_chain_used_back_or_forward());

        start_chain(&mut chain, PageTransition::Link, t0);
        assert!(!chain.navigation_chain_used_back_or_forward());
    }

    #[test]
    fn chain_expiry_uses_fifteen_second_window() {
        let mut chain = RedirectChain::new();
        let t0 = Instant::now();
        start_chain(&mut chain, PageTransition::Link, t0);

        assert!(!chain.is_navigation_chain_expired(t0 + Duration::from_millis(14_900)));
        assert!(chain.is_navigation_chain_expired(t0 + Duration::from_millis(15_100)));
    }

    #[test]
    fn new_chain_without_intent_discards_intent_state() {
        let mut chain = RedirectChain::new();
        let t0 = Instant::now();
        chain.set_intent_state(IntentState::new(target()));
        start_chain(&mut chain, PageTransition::FromExternalApi, t0);
        assert!(chain.is_noninitial_load_in_intent_chain() == false);

        start_chain(&mut chain, PageTransition::Typed, t0);
        assert!(!chain.intent_prefers_to_stay_in_browser());
        assert!(!chain.is_from_custom_tab_intent());
        assert!(!chain.was_task_started_by_external_intent());
    }

    #[test]
    fn unchanged_resolver_set_is_not_new() {
        let mut chain = RedirectChain::new();
        chain.set_intent_state(IntentState::new(target()));
        start_chain(&mut chain, PageTransition::FromExternalApi, Instant::now());

        let current = vec![handler("com.example.video")];
        assert!(!chain.has_new_resolver(&current, |_| vec![handler("com.example.video")]));
    }

    #[test]
    fn grown_resolver_set_is_new() {
        let mut chain = RedirectChain::new();
        chain.set_intent_state(IntentState::new(target()));
        start_chain(&mut chain, PageTransition::FromExternalApi, Instant::now());

        let current = vec![handler("com.example.video"), handler("com.example.other")];
        assert!(chain.has_new_resolver(&current, |_| vec![handler("com.example.video")]));
    }

    #[test]
    fn no_intent_state_means_any_resolver_is_new() {
        let chain = RedirectChain::new();
        assert!(chain.has_new_resolver(&[handler("a")], |_| vec![]));
        assert!(!chain.has_new_resolver(&[], |_| vec![]));
    }

    #[test]
    fn take_should_not_block_override_clears_on_read() {
        let mut chain = RedirectChain::new();
        start_chain(&mut chain, PageTransition::Link, Instant::now());
        chain.set_should_not_block_override_on_current_chain();
        assert!(chain.take_should_not_block_override());
        assert!(!chain.take_should_not_block_override());
    }

    #[test]
    fn intent_chain_noninitial_load() {
        let mut chain = RedirectChain::new();
        let t0 = Instant::now();
        chain.set_intent_state(IntentState::new(target()));
        start_chain(&mut chain, PageTransition::FromExternalApi, t0);
        assert!(!chain.is_noninitial_load_in_intent_chain());

        chain.update_new_url_loading(PageTransition::Link, true, false, false, true, 1, t0);
        assert!(chain.is_noninitial_load_in_intent_chain());
    }
}
