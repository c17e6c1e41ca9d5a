use tracing::{debug, info, warn};
use url::Url;

use crate::capabilities::{
    AppLauncher, EmbedderDelegate, MarketRedirector, PromptKind, PromptRequest, SystemTimeSource,
    TimeSource, UserPrompt,
};
use crate::chain::RedirectChain;
use crate::config::GatekeeperSettings;
use crate::intent::TargetIntent;
use crate::navigation::{NavigationDescriptor, PageTransition};
use crate::resolver::{
    HandlerDescriptor, IntentResolver, ResolverQueries, contains_owner, handlers_subset_of,
    specialized_handlers,
};

/// What the tab should do with the candidate navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the navigation proceed in the tab.
    StayInBrowser,
    /// Replace the tab's pending navigation with this URL.
    ClobberWithFallbackUrl(Url),
    /// An external application was (or is being) launched.
    LaunchExternalApp,
    /// The decision is parked on user input; resume through
    /// [`ExternalNavigationEngine::resolve_async_action`].
    AsyncAction(AsyncActionKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncActionKind {
    /// The gated outcome is a browser navigation (e.g. file access).
    GateBrowserNavigation,
    /// The gated outcome is an external app launch.
    GateIntentLaunch,
}

/// Outcome of one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    /// The launch (if any) was driven by the fallback URL rather than
    /// the primary target.
    pub launched_from_fallback: bool,
}

impl Verdict {
    fn stay() -> Self {
        Self {
            decision: Decision::StayInBrowser,
            launched_from_fallback: false,
        }
    }
}

/// Outcome of resuming a parked decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncResolution {
    pub verdict: Verdict,
    /// The tab existed only for this navigation and may now close.
    pub can_close_tab: bool,
    /// The resolution navigates the tab somewhere else.
    pub will_replace_current_url: bool,
}

/// How much the current navigation chain authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDisposition {
    /// The chain carries clear user intent; launches may proceed.
    Allowed,
    /// Launches need explicit user confirmation.
    RequiresPrompt,
    /// The session belongs to a trusted calling app; skip prompts.
    ForTrustedCaller,
}

#[derive(Debug)]
enum PendingAsyncAction {
    FileAccess { url: Url },
    GatedLaunch { target: TargetIntent },
}

/// Short-circuit result of the rule walk, before fallback handling.
struct RuleOutcome {
    decision: Decision,
    /// Whether the fallback pass may itself leave the browser (store
    /// redirects). Hard security blocks clear this.
    allow_external_fallback: bool,
}

impl RuleOutcome {
    fn stay() -> Self {
        Self {
            decision: Decision::StayInBrowser,
            allow_external_fallback: true,
        }
    }

    fn blocked() -> Self {
        Self {
            decision: Decision::StayInBrowser,
            allow_external_fallback: false,
        }
    }

    fn decided(decision: Decision) -> Self {
        Self {
            decision,
            allow_external_fallback: false,
        }
    }
}

/// Decides, per candidate navigation, whether the tab keeps it, replaces
/// it with a fallback, or hands it to an external application.
///
/// One engine instance serves one tab; decisions consult the tab's
/// [`RedirectChain`] and may latch flags on it.
pub struct ExternalNavigationEngine {
    settings: GatekeeperSettings,
    delegate: Box<dyn EmbedderDelegate>,
    resolver: Box<dyn IntentResolver>,
    launcher: Box<dyn AppLauncher>,
    prompt: Box<dyn UserPrompt>,
    store: Box<dyn MarketRedirector>,
    clock: Box<dyn TimeSource>,
    pending: Option<PendingAsyncAction>,
}

impl ExternalNavigationEngine {
    pub fn new(
        settings: GatekeeperSettings,
        delegate: Box<dyn EmbedderDelegate>,
        resolver: Box<dyn IntentResolver>,
        launcher: Box<dyn AppLauncher>,
        prompt: Box<dyn UserPrompt>,
        store: Box<dyn MarketRedirector>,
    ) -> Self {
        Self {
            settings,
            delegate,
            resolver,
            launcher,
            prompt,
            store,
            clock: Box::new(SystemTimeSource),
            pending: None,
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Decide the candidate navigation. The caller must have fed the
    /// navigation into `chain.update_new_url_loading` first.
    pub fn decide(
        &mut self,
        descriptor: &NavigationDescriptor,
        chain: &mut RedirectChain,
    ) -> Verdict {
        // A new navigation supersedes any parked decision.
        self.pending = None;

        let target = TargetIntent::from_descriptor(descriptor, &self.settings);
        let outcome = self.walk_rules(descriptor, chain, &target);

        match outcome.decision {
            Decision::StayInBrowser => {
                self.handle_fallback(chain, &target, outcome.allow_external_fallback)
            }
            decision => Verdict {
                decision,
                launched_from_fallback: false,
            },
        }
    }

    /// Resume a decision previously parked as [`Decision::AsyncAction`].
    /// `proceed` is the user's answer. A no-op when nothing is pending.
    pub fn resolve_async_action(
        &mut self,
        chain: &mut RedirectChain,
        proceed: bool,
    ) -> AsyncResolution {
        let Some(pending) = self.pending.take() else {
            debug!("async resolution with nothing pending");
            return AsyncResolution {
                verdict: Verdict::stay(),
                can_close_tab: false,
                will_replace_current_url: false,
            };
        };

        match pending {
            PendingAsyncAction::FileAccess { url } => {
                if proceed {
                    AsyncResolution {
                        verdict: Verdict {
                            decision: Decision::ClobberWithFallbackUrl(url),
                            launched_from_fallback: false,
                        },
                        can_close_tab: false,
                        will_replace_current_url: true,
                    }
                } else {
                    debug!("file access declined, dropping navigation");
                    AsyncResolution {
                        verdict: Verdict::stay(),
                        can_close_tab: false,
                        will_replace_current_url: false,
                    }
                }
            }
            PendingAsyncAction::GatedLaunch { target } => {
                self.resolve_gated_launch(chain, target, proceed)
            }
        }
    }

    /// The tab hosting the pending prompt was destroyed; any later
    /// resumption becomes a no-op.
    pub fn cancel_async_action(&mut self) {
        if self.pending.take().is_some() {
            debug!("pending async action cancelled");
        }
    }

    fn resolve_gated_launch(
        &mut self,
        chain: &mut RedirectChain,
        target: TargetIntent,
        proceed: bool,
    ) -> AsyncResolution {
        if proceed {
            match self.launcher.launch(&target) {
                Ok(()) => {
                    info!(target = %target.url, "launched external app after confirmation");
                    return AsyncResolution {
                        verdict: Verdict {
                            decision: Decision::LaunchExternalApp,
                            launched_from_fallback: false,
                        },
                        can_close_tab: true,
                        will_replace_current_url: false,
                    };
                }
                Err(err) => warn!(%err, "confirmed launch failed"),
            }
        } else {
            debug!("user declined external launch");
        }

        // Declined or failed: load the fallback if there is one.
        if let Some(fallback) = target.fallback_url {
            if !chain.take_should_not_block_override() {
                chain.set_should_not_override_url_loading();
            }
            return AsyncResolution {
                verdict: Verdict {
                    decision: Decision::ClobberWithFallbackUrl(fallback),
                    launched_from_fallback: false,
                },
                can_close_tab: false,
                will_replace_current_url: true,
            };
        }

        AsyncResolution {
            verdict: Verdict::stay(),
            can_close_tab: false,
            will_replace_current_url: false,
        }
    }

    /// Ordered rule walk. First rule to decide wins.
    fn walk_rules(
        &mut self,
        descriptor: &NavigationDescriptor,
        chain: &mut RedirectChain,
        target: &TargetIntent,
    ) -> RuleOutcome {
        let now = self.clock.now();

        if descriptor.is_hidden_cross_frame_navigation
            && !descriptor.is_redirect
            && !descriptor.is_initial_navigation_in_frame
        {
            chain.set_performed_hidden_cross_frame_navigation();
        }
        if chain.performed_hidden_cross_frame_navigation() {
            debug!("chain renavigated another frame without consent, blocking");
            return RuleOutcome::blocked();
        }

        if chain.should_not_override_url_loading() {
            debug!("chain already consumed its launch budget");
            return RuleOutcome::blocked();
        }

        if !descriptor.is_main_frame && !descriptor.has_user_gesture {
            debug!("subframe navigation without gesture");
            return RuleOutcome::blocked();
        }

        if descriptor.application_must_be_in_foreground
            && !self.delegate.is_application_in_foreground()
            && !descriptor.is_from_intent()
            && !chain.is_noninitial_load_in_intent_chain()
        {
            debug!("application is backgrounded");
            return RuleOutcome::blocked();
        }

        if descriptor.is_background_tab && !descriptor.allow_launches_in_background_tabs {
            debug!("background tab may not launch apps");
            return RuleOutcome::blocked();
        }

        if chain.navigation_chain_used_back_or_forward() {
            debug!("history traversal never re-launches apps");
            return RuleOutcome::blocked();
        }

        if chain.is_navigation_chain_expired(now) {
            debug!("navigation chain outlived its launch window");
            return RuleOutcome::blocked();
        }

        if target.url.scheme() == "file" && self.delegate.needs_file_access_permission(descriptor) {
            debug!(url = %target.url, "file navigation gated on permission");
            self.prompt.show(PromptRequest {
                kind: PromptKind::FileAccess,
                target_url: target.url.clone(),
                handler_owner: None,
            });
            self.pending = Some(PendingAsyncAction::FileAccess {
                url: target.url.clone(),
            });
            return RuleOutcome::decided(Decision::AsyncAction(
                AsyncActionKind::GateBrowserNavigation,
            ));
        }

        if self.settings.disable_external_intents {
            debug!("external intents disabled by settings");
            return RuleOutcome::blocked();
        }
        if self
            .delegate
            .should_disable_external_intents_for_url(&target.url)
        {
            debug!(url = %target.url, "embedder vetoed external intents for url");
            return RuleOutcome::blocked();
        }

        if let Some(referrer) = &descriptor.referrer_url {
            if descriptor.transition == PageTransition::Link
                && self.settings.is_internal_scheme(referrer.scheme())
                && self
                    .delegate
                    .should_embedder_initiated_navigations_stay_in_browser()
            {
                debug!("link from browser-internal page stays in browser");
                return RuleOutcome::stay();
            }
        }

        if descriptor.transition == PageTransition::FormSubmit && !descriptor.is_redirect {
            debug!("direct form submission stays in browser");
            return RuleOutcome::stay();
        }

        let scheme = target.scheme();
        if scheme.is_empty() {
            debug!("target has no usable scheme");
            return RuleOutcome::blocked();
        }
        if self.settings.is_internal_scheme(&scheme) {
            debug!(%scheme, "browser-internal scheme is never launchable");
            return RuleOutcome::blocked();
        }
        if scheme == "content" {
            debug!("content URIs cannot be exposed across applications");
            return RuleOutcome::blocked();
        }
        let is_external_protocol = !self.settings.is_browser_scheme(&scheme);
        if !is_external_protocol && !matches!(scheme.as_str(), "http" | "https") {
            debug!(%scheme, "browser renders this scheme itself");
            return RuleOutcome::stay();
        }

        if self.settings.matches_stay_exception(&target.url) {
            debug!(url = %target.url, "url matches stay-in-browser exception");
            return RuleOutcome::stay();
        }

        if chain.intent_prefers_to_stay_in_browser() {
            debug!("initiating intent asked to stay in this browser");
            return RuleOutcome::stay();
        }

        let disposition = self.chain_disposition(chain);
        if disposition == ChainDisposition::RequiresPrompt && !is_external_protocol {
            debug!("web navigation chain lacks user intent, staying");
            return RuleOutcome::blocked();
        }

        let resolver = &*self.resolver;
        let queries = ResolverQueries::new(resolver, target);
        let use_all_handlers =
            self.settings.match_non_default_handlers && chain.is_noninitial_load_in_intent_chain();
        let handlers: &[HandlerDescriptor] = if use_all_handlers {
            queries.all_handlers()
        } else {
            queries.handlers()
        };

        if handlers.is_empty() {
            return self.handle_unresolvable(target, is_external_protocol, disposition);
        }
        let first_handler_owner = handlers.first().map(|h| h.owner.clone());

        if handlers.iter().all(|handler| !handler.is_exported) {
            debug!("every resolved handler is non-exported");
            return RuleOutcome::blocked();
        }
        if let Some(best) = queries.best_handler() {
            if !best.is_exported {
                debug!(owner = %best.owner, "resolved handler is not exported");
                return RuleOutcome::blocked();
            }
        }

        if handlers.len() == 1 && handlers[0].owner == self.delegate.self_identity() {
            if target.url != descriptor.url {
                debug!("target resolves back to us, navigating to unwrapped url");
                return RuleOutcome::decided(Decision::ClobberWithFallbackUrl(target.url.clone()));
            }
            debug!("we are the only handler, staying");
            return RuleOutcome::stay();
        }

        let specialized = specialized_handlers(handlers);
        if specialized.is_empty() && !is_external_protocol {
            debug!("no specialized handler for web url, staying");
            return RuleOutcome::stay();
        }

        if !is_external_protocol {
            let previous = self
                .delegate
                .last_committed_url()
                .or_else(|| descriptor.referrer_url.clone());
            if let Some(previous) = previous {
                if previous.host_str().is_some() && previous.host_str() == target.url.host_str() {
                    let previous_target = TargetIntent {
                        url: previous,
                        package: None,
                        fallback_url: None,
                        market_referrer: None,
                        has_extras: false,
                    };
                    let previous_handlers = resolver.query(&previous_target).default_handlers;
                    if handlers_subset_of(handlers, &previous_handlers) {
                        debug!("same-host navigation with no new handlers, staying");
                        return RuleOutcome::stay();
                    }
                }
            }
        }

        if chain.is_noninitial_load_in_intent_chain()
            && !chain.has_new_resolver(handlers, |t| resolver.query(t).default_handlers)
        {
            debug!("intent chain redirect with unchanged handlers, staying");
            return RuleOutcome::stay();
        }

        if let Some(wrapper) = &descriptor.native_client_package {
            if contains_owner(handlers, wrapper) {
                debug!(%wrapper, "already running inside the target wrapper app");
                return RuleOutcome::stay();
            }
        }

        let trusted_wrapper = use_all_handlers
            && specialized.len() == 1
            && self.delegate.is_trusted_wrapper_package(&specialized[0]);

        if descriptor.is_incognito {
            if !self.delegate.has_valid_container() {
                debug!("no container to host the incognito prompt");
                return RuleOutcome::blocked();
            }
            debug!("asking before leaving incognito");
            return self.park_gated_launch(target, PromptKind::LeaveIncognito, first_handler_owner);
        }

        if disposition == ChainDisposition::ForTrustedCaller {
            debug!("trusted calling app, launching without prompt");
            return self.launch(target);
        }

        if self.delegate.should_avoid_disambiguation_prompt()
            && queries.resolves_to_chooser()
            && !trusted_wrapper
        {
            debug!("would show a chooser, embedder wants none");
            return RuleOutcome::stay();
        }

        // Intents carrying opaque extras must not reach a generic
        // handler without the user seeing a prompt.
        let needs_prompt = disposition == ChainDisposition::RequiresPrompt
            || (target.has_extras && specialized.is_empty());
        if needs_prompt {
            if !self.delegate.has_valid_container() {
                debug!("launch needs confirmation but no container exists");
                return RuleOutcome::blocked();
            }
            debug!("asking before launching app");
            return self.park_gated_launch(target, PromptKind::LaunchApp, first_handler_owner);
        }

        self.launch(target)
    }

    fn launch(&mut self, target: &TargetIntent) -> RuleOutcome {
        match self.launcher.launch(target) {
            Ok(()) => {
                info!(target = %target.url, "launched external app");
                RuleOutcome::decided(Decision::LaunchExternalApp)
            }
            Err(err) => {
                warn!(%err, target = %target.url, "launch failed, staying in browser");
                RuleOutcome::blocked()
            }
        }
    }

    fn park_gated_launch(
        &mut self,
        target: &TargetIntent,
        kind: PromptKind,
        handler_owner: Option<String>,
    ) -> RuleOutcome {
        self.prompt.show(PromptRequest {
            kind,
            target_url: target.url.clone(),
            handler_owner,
        });
        self.pending = Some(PendingAsyncAction::GatedLaunch {
            target: target.clone(),
        });
        RuleOutcome::decided(Decision::AsyncAction(AsyncActionKind::GateIntentLaunch))
    }

    fn handle_unresolvable(
        &mut self,
        target: &TargetIntent,
        is_external_protocol: bool,
        disposition: ChainDisposition,
    ) -> RuleOutcome {
        if !is_external_protocol {
            return RuleOutcome::stay();
        }
        if target.fallback_url.is_some() {
            debug!("no handler, deferring to fallback url");
            return RuleOutcome::stay();
        }
        if let Some(package) = &target.package {
            if disposition != ChainDisposition::RequiresPrompt {
                return self.send_to_store(package, target.market_referrer.as_deref());
            }
        }
        debug!(url = %target.url, "no handler for external protocol");
        RuleOutcome::blocked()
    }

    fn send_to_store(&mut self, package: &str, referrer: Option<&str>) -> RuleOutcome {
        let referrer = referrer
            .map(str::to_string)
            .unwrap_or_else(|| self.delegate.self_identity().to_string());
        match self.store.send_to_store(package, &referrer) {
            Ok(()) => {
                info!(%package, "redirected to store listing");
                RuleOutcome::decided(Decision::LaunchExternalApp)
            }
            Err(err) => {
                warn!(%err, %package, "store redirect failed");
                RuleOutcome::blocked()
            }
        }
    }

    /// Fallback pass: runs only when the rule walk stayed in the browser.
    fn handle_fallback(
        &mut self,
        chain: &mut RedirectChain,
        target: &TargetIntent,
        allow_external_fallback: bool,
    ) -> Verdict {
        let Some(fallback) = &target.fallback_url else {
            return Verdict::stay();
        };

        // A chained fallback URL is ignored: once a fallback load has
        // latched the chain, later hops may not clobber the tab again.
        if chain.should_not_override_url_loading() {
            debug!(fallback = %fallback, "ignoring chained fallback url");
            return Verdict::stay();
        }

        if allow_external_fallback {
            if let Some(package) = self.settings.store.listed_package(fallback) {
                let referrer = self.settings.store.listed_referrer(fallback);
                if let Decision::LaunchExternalApp =
                    self.send_to_store(&package, referrer.as_deref()).decision
                {
                    return Verdict {
                        decision: Decision::LaunchExternalApp,
                        launched_from_fallback: true,
                    };
                }
            }
        }

        // Fallback loads must not chain into app-probing redirects.
        if !chain.take_should_not_block_override() {
            chain.set_should_not_override_url_loading();
        }
        debug!(fallback = %fallback, "loading fallback url in tab");
        Verdict {
            decision: Decision::ClobberWithFallbackUrl(fallback.clone()),
            launched_from_fallback: false,
        }
    }

    fn chain_disposition(&self, chain: &RedirectChain) -> ChainDisposition {
        if self.delegate.is_for_trusted_calling_app() {
            return ChainDisposition::ForTrustedCaller;
        }
        let Some(initial) = chain.initial_navigation_state() else {
            return ChainDisposition::RequiresPrompt;
        };
        if initial.is_renderer_initiated && !initial.has_user_gesture {
            return ChainDisposition::RequiresPrompt;
        }
        if initial.is_from_reload {
            return ChainDisposition::RequiresPrompt;
        }
        ChainDisposition::Allowed
    }
}
