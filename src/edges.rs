use itertools::Itertools;
use serde::Serialize;

use crate::{
    entity_store::EntityStore,
    resolve::{
        categories, category_or_unknown,
        principal::{service_principal_category, PrincipalResolverChain},
        scope::resolve_scope,
    },
};

/// A fully resolved "Source has Role on Target" fact, ready for graphing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PermissionEdge {
    pub source: String,
    pub source_type: String,
    pub role: String,
    pub target: String,
    pub target_type: String,
    pub source_color: Option<String>,
    pub target_color: Option<String>,
}

impl PermissionEdge {
    fn uncolored(
        source: String,
        source_type: String,
        role: String,
        target: String,
        target_type: String,
    ) -> Self {
        PermissionEdge {
            source,
            source_type,
            role,
            target,
            target_type,
            source_color: None,
            target_color: None,
        }
    }
}

/// Edges for app roles granted on service principals.
///
/// The principal is already named by the assignment, so the only work is
/// picking its category.  A name belonging to a service principal with an
/// AppType takes that type, then a name belonging to a resource is a
/// "Resource".  An untyped service principal goes through
/// `service_principal_category` like in the Azure-role stream, and anything
/// else keeps the recorded principal type.
pub fn app_role_edges(store: &EntityStore) -> Vec<PermissionEdge> {
    let span = trace_span!("app_role_edges");
    let _span_guard = span.enter();

    store
        .app_role_assignments()
        .iter()
        .map(|assignment| {
            let recorded = assignment.principal_type.as_deref();
            let named_sp = store.service_principal_by_display_name(&assignment.principal_name);
            let sp_type = named_sp
                .and_then(|sp| sp.app_type.as_deref())
                .filter(|t| !t.trim().is_empty());
            let source_type = match sp_type {
                Some(app_type) => app_type.to_string(),
                None if store.resource_by_name(&assignment.principal_name).is_some() => {
                    categories::RESOURCE.to_string()
                }
                None if named_sp.is_some() => service_principal_category(None, recorded),
                None => category_or_unknown(recorded),
            };

            let (role, target_type) = match store.app_role(&assignment.app_role_id) {
                Some((owner, app_role)) => (
                    app_role
                        .name
                        .clone()
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| assignment.app_role_id.clone()),
                    category_or_unknown(owner.app_type.as_deref()),
                ),
                None => {
                    trace!(app_role_id = %assignment.app_role_id, "unmatched app role");
                    let owner_type = assignment
                        .resource_id
                        .as_deref()
                        .and_then(|id| store.service_principal(id))
                        .and_then(|sp| sp.app_type.as_deref());
                    (
                        assignment.app_role_id.clone(),
                        category_or_unknown(owner_type),
                    )
                }
            };

            PermissionEdge::uncolored(
                assignment.principal_name.clone(),
                source_type,
                role,
                assignment.resource_name.clone(),
                target_type,
            )
        })
        .collect()
}

/// Edges for Azure RBAC role assignments.  The principal goes through the
/// standard resolver chain, falling back to the id and its recorded type.
pub fn azure_role_edges(store: &EntityStore) -> Vec<PermissionEdge> {
    let span = trace_span!("azure_role_edges");
    let _span_guard = span.enter();

    let principals = PrincipalResolverChain::standard(store);

    store
        .role_assignments()
        .iter()
        .map(|assignment| {
            let (source, source_type) = match principals
                .try_resolve(&assignment.principal_id, assignment.principal_type.as_deref())
            {
                Some(resolution) => resolution.into_pair(),
                None => (
                    assignment.principal_id.clone(),
                    category_or_unknown(assignment.principal_type.as_deref()),
                ),
            };

            let (target, target_type) = resolve_scope(store, &assignment.scope).into_pair();

            let role = match store.role_definition(&assignment.role_definition_id) {
                Some(rd) if !rd.role_name.is_empty() => rd.role_name.clone(),
                _ => {
                    trace!(role_definition_id = %assignment.role_definition_id, "unmatched role definition");
                    assignment.role_definition_id.clone()
                }
            };

            PermissionEdge::uncolored(source, source_type, role, target, target_type)
        })
        .collect()
}

/// Attach display colors from the type palette.  Types without an entry are
/// left uncolored so the renderer picks its default.
pub fn colorize(store: &EntityStore, edges: Vec<PermissionEdge>) -> Vec<PermissionEdge> {
    edges
        .into_iter()
        .map(|mut edge| {
            edge.source_color = store.color_for(&edge.source_type);
            edge.target_color = store.color_for(&edge.target_type);
            edge
        })
        .collect()
}

/// Build the canonical edge list: app-role edges followed by Azure-role
/// edges, exact duplicates removed (first occurrence kept), colors attached.
pub fn build_edges(store: &EntityStore) -> Vec<PermissionEdge> {
    let span = info_span!("build_edges");
    let _span_guard = span.enter();

    let app_edges = app_role_edges(store);
    let azure_edges = azure_role_edges(store);
    let total = app_edges.len() + azure_edges.len();

    let unique: Vec<PermissionEdge> = app_edges.into_iter().chain(azure_edges).unique().collect();
    info!(
        edges = unique.len(),
        duplicates = total - unique.len(),
        "built permission edges"
    );

    colorize(store, unique)
}
