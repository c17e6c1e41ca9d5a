//! Navigation gatekeeper for browser tabs: tracks redirect chains and
//! decides, per candidate URL, whether the tab keeps the navigation,
//! replaces it with a fallback, or hands it to an external application.

pub mod capabilities;
pub mod chain;
pub mod config;
pub mod engine;
pub mod intent;
pub mod navigation;
pub mod resolver;
pub mod telemetry;

pub use crate::capabilities::{
    AppLauncher, EmbedderDelegate, LaunchError, MarketRedirector, PromptKind, PromptRequest,
    SystemTimeSource, TimeSource, UserPrompt,
};
pub use crate::chain::{IntentState, NAVIGATION_CHAIN_TIMEOUT, RedirectChain};
pub use crate::config::{GatekeeperSettings, StayInBrowserException, StoreSettings};
pub use crate::engine::{
    AsyncActionKind, AsyncResolution, ChainDisposition, Decision, ExternalNavigationEngine,
    Verdict,
};
pub use crate::intent::TargetIntent;
pub use crate::navigation::{NavigationDescriptor, PageTransition};
pub use crate::resolver::{HandlerDescriptor, HandlerFilter, IntentResolver, ResolveResult};
