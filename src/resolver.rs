use std::collections::HashSet;

use once_cell::unsync::OnceCell;

use crate::intent::TargetIntent;

/// Host/path scoping of a handler's registration, used to tell
/// specialized handlers (maps, video apps) apart from generic ones
/// (other browsers).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerFilter {
    /// Hosts the handler registered for; `*` means any host.
    pub hosts: Vec<String>,
    /// Path patterns the handler registered for.
    pub paths: Vec<String>,
}

/// One installed application able to handle a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDescriptor {
    /// Package or component identity of the handler.
    pub owner: String,
    /// Registration scope; `None` when the platform withheld it.
    pub filter: Option<HandlerFilter>,
    /// Whether the component may be launched from another application.
    pub is_exported: bool,
}

impl HandlerDescriptor {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            filter: None,
            is_exported: true,
        }
    }

    /// A handler is specialized when its registration is scoped to
    /// specific hosts or paths. Wildcard hosts and empty registrations
    /// classify as generic.
    pub fn is_specialized(&self) -> bool {
        let Some(filter) = &self.filter else {
            // Err on the side of classifying the handler as generic.
            return false;
        };
        if filter.hosts.is_empty() && filter.paths.is_empty() {
            return false;
        }
        !filter.hosts.iter().any(|host| host == "*")
    }
}

/// Result of resolving a target against the installed handlers.
#[derive(Debug, Clone, Default)]
pub struct ResolveResult {
    /// Handlers matching with default filters only.
    pub default_handlers: Vec<HandlerDescriptor>,
    /// Handlers matching including non-default filters.
    pub all_handlers: Vec<HandlerDescriptor>,
}

/// Capability interface over the platform's handler resolution.
/// Queries are synchronous and assumed cheap; memoization is the
/// engine's job, not the implementor's.
pub trait IntentResolver {
    /// Installed handlers for the target.
    fn query(&self, target: &TargetIntent) -> ResolveResult;

    /// The single handler the platform would pick by default, if any.
    /// `None` when resolution would fall through to a chooser UI.
    fn best_handler(&self, target: &TargetIntent) -> Option<HandlerDescriptor>;
}

/// At-most-once view over the resolver for a single decision. Several
/// rules consult the same query; it must not be repeated mid-decision.
pub struct ResolverQueries<'a> {
    resolver: &'a dyn IntentResolver,
    target: &'a TargetIntent,
    resolved: OnceCell<ResolveResult>,
    best: OnceCell<Option<HandlerDescriptor>>,
}

impl<'a> ResolverQueries<'a> {
    pub fn new(resolver: &'a dyn IntentResolver, target: &'a TargetIntent) -> Self {
        Self {
            resolver,
            target,
            resolved: OnceCell::new(),
            best: OnceCell::new(),
        }
    }

    pub fn handlers(&self) -> &[HandlerDescriptor] {
        &self
            .resolved
            .get_or_init(|| self.resolver.query(self.target))
            .default_handlers
    }

    pub fn all_handlers(&self) -> &[HandlerDescriptor] {
        &self
            .resolved
            .get_or_init(|| self.resolver.query(self.target))
            .all_handlers
    }

    pub fn best_handler(&self) -> Option<&HandlerDescriptor> {
        self.best
            .get_or_init(|| self.resolver.best_handler(self.target))
            .as_ref()
    }

    /// Whether default resolution would end up at a chooser UI rather
    /// than a concrete handler: the best handler is absent or is not one
    /// of the specific handlers found.
    pub fn resolves_to_chooser(&self) -> bool {
        match self.best_handler() {
            Some(best) => !handlers_subset_of(std::slice::from_ref(best), self.handlers()),
            None => true,
        }
    }
}

/// Whether every handler in `handlers` also appears in `container`,
/// compared by owner identity.
pub fn handlers_subset_of(handlers: &[HandlerDescriptor], container: &[HandlerDescriptor]) -> bool {
    let container: HashSet<&str> = container.iter().map(|h| h.owner.as_str()).collect();
    handlers.iter().all(|h| container.contains(h.owner.as_str()))
}

/// Owner identities of the specialized handlers in `handlers`.
pub fn specialized_handlers(handlers: &[HandlerDescriptor]) -> Vec<String> {
    handlers
        .iter()
        .filter(|h| h.is_specialized())
        .map(|h| h.owner.clone())
        .collect()
}

pub fn contains_owner(handlers: &[HandlerDescriptor], owner: &str) -> bool {
    handlers.iter().any(|h| h.owner == owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use url::Url;

    fn target() -> TargetIntent {
        TargetIntent {
            url: Url::parse("https://video.example/watch?id=1").unwrap(),
            package: None,
            fallback_url: None,
            market_referrer: None,
            has_extras: false,
        }
    }

    fn specialized(owner: &str) -> HandlerDescriptor {
        HandlerDescriptor {
            owner: owner.into(),
            filter: Some(HandlerFilter {
                hosts: vec!["video.example".into()],
                paths: vec![],
            }),
            is_exported: true,
        }
    }

    struct CountingResolver {
        queries: Cell<usize>,
    }

    impl IntentResolver for CountingResolver {
        fn query(&self, _target: &TargetIntent) -> ResolveResult {
            self.queries.set(self.queries.get() + 1);
            ResolveResult {
                default_handlers: vec![specialized("com.example.video")],
                all_handlers: vec![specialized("com.example.video")],
            }
        }

        fn best_handler(&self, _target: &TargetIntent) -> Option<HandlerDescriptor> {
            Some(specialized("com.example.video"))
        }
    }

    #[test]
    fn wildcard_host_is_not_specialized() {
        let mut handler = specialized("com.example.browser");
        handler.filter = Some(HandlerFilter {
            hosts: vec!["*".into()],
            paths: vec![],
        });
        assert!(!handler.is_specialized());
    }

    #[test]
    fn empty_filter_is_not_specialized() {
        let mut handler = specialized("com.example.app");
        handler.filter = Some(HandlerFilter::default());
        assert!(!handler.is_specialized());
        handler.filter = None;
        assert!(!handler.is_specialized());
    }

    #[test]
    fn scoped_filter_is_specialized() {
        assert!(specialized("com.example.video").is_specialized());
    }

    #[test]
    fn queries_are_memoized() {
        let resolver = CountingResolver {
            queries: Cell::new(0),
        };
        let target = target();
        let queries = ResolverQueries::new(&resolver, &target);
        let _ = queries.handlers();
        let _ = queries.all_handlers();
        let _ = queries.handlers();
        assert_eq!(resolver.queries.get(), 1);
    }

    #[test]
    fn subset_comparison_uses_owner_identity() {
        let a = vec![specialized("a")];
        let both = vec![specialized("a"), specialized("b")];
        assert!(handlers_subset_of(&a, &both));
        assert!(!handlers_subset_of(&both, &a));
        assert!(handlers_subset_of(&[], &a));
    }

    #[test]
    fn chooser_detection() {
        let resolver = CountingResolver {
            queries: Cell::new(0),
        };
        let target = target();
        let queries = ResolverQueries::new(&resolver, &target);
        assert!(!queries.resolves_to_chooser());
    }
}
