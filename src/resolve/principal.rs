use super::{categories, Resolution};
use crate::entity_store::EntityStore;

/// One way of turning an opaque principal id into a display name and
/// category.  Strategies answer `None` when the id isn't theirs so that the
/// chain can move on to the next one.  `recorded_type` is whatever type the
/// referencing row carried, for strategies whose own tables can lack one.
pub trait PrincipalResolver {
    /// Short name used in trace output.
    fn name(&self) -> &'static str;
    fn resolve(&self, principal_id: &str, recorded_type: Option<&str>) -> Option<Resolution>;
}

pub struct GroupResolver<'a>(pub &'a EntityStore);

impl<'a> PrincipalResolver for GroupResolver<'a> {
    fn name(&self) -> &'static str {
        "group"
    }

    fn resolve(&self, principal_id: &str, _recorded_type: Option<&str>) -> Option<Resolution> {
        self.0.group(principal_id).map(|g| {
            let category = match g.group_type.as_deref() {
                Some(t) if !t.is_empty() => t,
                _ => categories::GROUP,
            };
            Resolution::new(&g.display_name, category)
        })
    }
}

pub struct UserResolver<'a>(pub &'a EntityStore);

impl<'a> PrincipalResolver for UserResolver<'a> {
    fn name(&self) -> &'static str {
        "user"
    }

    fn resolve(&self, principal_id: &str, _recorded_type: Option<&str>) -> Option<Resolution> {
        self.0.user(principal_id).map(|u| {
            let category = match u.user_type.as_deref() {
                Some(t) if !t.is_empty() => t,
                _ => categories::USER,
            };
            Resolution::new(&u.display_name, category)
        })
    }
}

/// A resource's system-assigned identity is shown as the resource itself.
pub struct ManagedIdentityResolver<'a>(pub &'a EntityStore);

impl<'a> PrincipalResolver for ManagedIdentityResolver<'a> {
    fn name(&self) -> &'static str {
        "managed_identity"
    }

    fn resolve(&self, principal_id: &str, _recorded_type: Option<&str>) -> Option<Resolution> {
        self.0
            .resource_by_principal_id(principal_id)
            .map(|r| Resolution::new(&r.resource_name, categories::RESOURCE))
    }
}

pub struct ServicePrincipalResolver<'a>(pub &'a EntityStore);

/// Category of a service principal.  "ManagedIdentity" principals are drawn
/// as applications.  A principal without an AppType takes the type recorded
/// on the referencing row, and only falls back to "ServicePrincipal" when
/// that is missing too.  Both edge streams go through here.
pub fn service_principal_category(app_type: Option<&str>, recorded_type: Option<&str>) -> String {
    match app_type.map(str::trim) {
        Some(categories::MANAGED_IDENTITY) => categories::APPLICATION.to_string(),
        Some(t) if !t.is_empty() => t.to_string(),
        _ => match recorded_type.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => categories::SERVICE_PRINCIPAL.to_string(),
        },
    }
}

impl<'a> PrincipalResolver for ServicePrincipalResolver<'a> {
    fn name(&self) -> &'static str {
        "service_principal"
    }

    fn resolve(&self, principal_id: &str, recorded_type: Option<&str>) -> Option<Resolution> {
        self.0.service_principal(principal_id).map(|sp| {
            Resolution::new(
                &sp.app_display_name,
                service_principal_category(sp.app_type.as_deref(), recorded_type),
            )
        })
    }
}

/// Ordered list of strategies; the first one to answer wins.
pub struct PrincipalResolverChain<'a> {
    resolvers: Vec<Box<dyn PrincipalResolver + 'a>>,
}

impl<'a> PrincipalResolverChain<'a> {
    pub fn new(resolvers: Vec<Box<dyn PrincipalResolver + 'a>>) -> Self {
        PrincipalResolverChain { resolvers }
    }

    /// The standard precedence: groups, then users, then managed identities
    /// attached to resources, then service principals.
    pub fn standard(store: &'a EntityStore) -> Self {
        PrincipalResolverChain::new(vec![
            Box::new(GroupResolver(store)),
            Box::new(UserResolver(store)),
            Box::new(ManagedIdentityResolver(store)),
            Box::new(ServicePrincipalResolver(store)),
        ])
    }

    pub fn try_resolve(&self, principal_id: &str, recorded_type: Option<&str>) -> Option<Resolution> {
        for resolver in &self.resolvers {
            if let Some(resolution) = resolver.resolve(principal_id, recorded_type) {
                trace!(principal_id, resolver = resolver.name(), "resolved principal");
                return Some(resolution);
            }
        }
        trace!(principal_id, "unresolved principal");
        None
    }

    /// Like `try_resolve` but an unmatched id passes through as both the name
    /// and the category.
    pub fn resolve(&self, principal_id: &str) -> Resolution {
        self.try_resolve(principal_id, None)
            .unwrap_or_else(|| Resolution::new(principal_id, principal_id))
    }
}

/// Resolve a principal id against the standard chain.
pub fn resolve_principal(store: &EntityStore, principal_id: &str) -> Resolution {
    PrincipalResolverChain::standard(store).resolve(principal_id)
}
