use std::time::Instant;

use url::Url;

use crate::intent::TargetIntent;
use crate::navigation::NavigationDescriptor;

/// Why an app launch failed. Launch failures are recoverable; the engine
/// degrades them to staying in the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchError {
    /// No activity could be found for the target.
    NotFound,
    /// The platform refused the launch on security grounds.
    SecurityDenied,
    /// The target payload exceeded the platform's transaction limits.
    TooLarge,
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::NotFound => write!(f, "no handler found for target"),
            LaunchError::SecurityDenied => write!(f, "launch denied by platform security"),
            LaunchError::TooLarge => write!(f, "target payload too large to deliver"),
        }
    }
}

impl std::error::Error for LaunchError {}

/// Embedder-specific policy and environment queries the engine consults
/// while walking its rules. Defaults describe a plain foreground browser
/// tab; embedders override what differs.
pub trait EmbedderDelegate {
    /// Package identity of the embedding application itself.
    fn self_identity(&self) -> &str;

    /// Whether the embedding application currently holds the foreground.
    fn is_application_in_foreground(&self) -> bool {
        true
    }

    /// Embedder veto: suppress all external launches for this URL.
    fn should_disable_external_intents_for_url(&self, _url: &Url) -> bool {
        false
    }

    /// Whether navigations the embedder itself started should stay in
    /// the browser rather than bounce back out to apps.
    fn should_embedder_initiated_navigations_stay_in_browser(&self) -> bool {
        true
    }

    /// Whether the session was started by an app trusted to receive
    /// launches without a prompt.
    fn is_for_trusted_calling_app(&self) -> bool {
        false
    }

    /// Whether a would-be chooser should be suppressed in favor of
    /// staying in the browser (e.g. auxiliary UI surfaces).
    fn should_avoid_disambiguation_prompt(&self) -> bool {
        false
    }

    /// URL currently committed in the tab, if any.
    fn last_committed_url(&self) -> Option<Url> {
        None
    }

    /// Whether the tab is still attached to a window that could host
    /// prompt UI.
    fn has_valid_container(&self) -> bool {
        true
    }

    /// Whether `package` is an installed-web-app wrapper the embedder
    /// vouches for.
    fn is_trusted_wrapper_package(&self, _package: &str) -> bool {
        false
    }

    /// Whether loading this navigation needs a file-access permission
    /// the embedder has not granted yet.
    fn needs_file_access_permission(&self, _descriptor: &NavigationDescriptor) -> bool {
        false
    }
}

/// Fires the actual app launch. Implementations talk to the platform;
/// the engine only sees success or a [`LaunchError`].
pub trait AppLauncher {
    fn launch(&mut self, target: &TargetIntent) -> Result<(), LaunchError>;
}

/// What a pending prompt is asking the user to approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Leaving incognito to launch an external app.
    LeaveIncognito,
    /// Launching an app for a navigation the chain did not clearly
    /// authorize.
    LaunchApp,
    /// Loading a file URL that needs a permission grant.
    FileAccess,
}

/// Prompt request handed to the embedder's UI layer. Fire-and-forget:
/// the embedder later reports the outcome through the engine's
/// resumption entry point.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub kind: PromptKind,
    pub target_url: Url,
    /// Handler the prompt should name, when one is known.
    pub handler_owner: Option<String>,
}

/// Shows launch confirmation UI. The engine never blocks on the answer;
/// it parks the decision and resumes when the embedder calls back.
pub trait UserPrompt {
    fn show(&mut self, request: PromptRequest);
}

/// Redirects an unresolvable target to the platform's app store.
pub trait MarketRedirector {
    /// Open the store listing for `package`, crediting `referrer`.
    fn send_to_store(&mut self, package: &str, referrer: &str) -> Result<(), LaunchError>;
}

/// Clock seam so chain-timeout behavior is testable.
pub trait TimeSource {
    fn now(&self) -> Instant;
}

/// Wall-clock time source used outside tests.
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
