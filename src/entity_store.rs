use std::{collections::HashMap, path::Path};

use serde::Serialize;

use crate::{
    errors::Result,
    file_format::tables::{
        load_tables, AppRoleAssignment, AzureRoleAssignment, Group, RawTables, Resource,
        RoleDefinition, ServicePrincipalRoleRow, Subscription, TypeStyle, User,
    },
};

/// An app role exposed by a service principal.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppRole {
    pub app_role_id: String,
    /// The role's `value`, which is what grants are labeled with.
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub origin: Option<String>,
}

/// A service principal regrouped from its flattened per-role rows.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServicePrincipal {
    pub object_id: String,
    pub app_id: Option<String>,
    pub app_display_name: String,
    pub app_type: Option<String>,
    pub creation_date: Option<String>,
    pub app_roles: Vec<AppRole>,
}

impl ServicePrincipal {
    fn from_row(row: &ServicePrincipalRoleRow) -> Self {
        ServicePrincipal {
            object_id: row.object_id.clone(),
            app_id: row.app_id.clone(),
            app_display_name: row.app_display_name.clone(),
            app_type: row.app_type.clone(),
            creation_date: row.app_creation_date.clone(),
            app_roles: vec![],
        }
    }
}

/// A join key that matched more than one distinct row.  Lookups always
/// return the first row in load order; conflicts are kept around so that the
/// ambiguity is visible rather than silently resolved.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JoinConflict {
    pub table: &'static str,
    pub key_column: &'static str,
    pub key: String,
    /// Number of distinct rows sharing the key, including the kept one.
    pub rows: usize,
}

/// Key → first row index, recording a conflict whenever a later row with the
/// same key differs from the kept one.
struct FirstMatchIndex {
    table: &'static str,
    key_column: &'static str,
    map: HashMap<String, usize>,
    conflicts: HashMap<String, usize>,
}

impl FirstMatchIndex {
    fn new(table: &'static str, key_column: &'static str) -> Self {
        FirstMatchIndex {
            table,
            key_column,
            map: HashMap::new(),
            conflicts: HashMap::new(),
        }
    }

    fn insert(&mut self, key: &str, idx: usize, same_as_kept: impl FnOnce(usize) -> bool) {
        if key.is_empty() {
            return;
        }
        match self.map.get(key) {
            None => {
                self.map.insert(key.to_string(), idx);
            }
            Some(&kept) => {
                if !same_as_kept(kept) {
                    *self.conflicts.entry(key.to_string()).or_insert(1) += 1;
                }
            }
        }
    }

    fn get(&self, key: &str) -> Option<usize> {
        self.map.get(key).copied()
    }

    fn drain_conflicts(&mut self, into: &mut Vec<JoinConflict>) {
        let mut keys: Vec<(String, usize)> = self.conflicts.drain().collect();
        keys.sort();
        for (key, rows) in keys {
            into.push(JoinConflict {
                table: self.table,
                key_column: self.key_column,
                key,
                rows,
            });
        }
    }
}

/// Immutable, indexed snapshot of every loaded table.  Built once and then
/// only ever borrowed by the resolvers and edge builder, so it can be shared
/// across threads without locking.
pub struct EntityStore {
    tables: RawTables,
    service_principals: Vec<ServicePrincipal>,

    groups_by_id: FirstMatchIndex,
    users_by_id: FirstMatchIndex,
    resources_by_principal_id: FirstMatchIndex,
    resources_by_name: FirstMatchIndex,
    sps_by_object_id: HashMap<String, usize>,
    sps_by_display_name: FirstMatchIndex,
    /// AppRoleId → (service principal index, role index).
    app_roles_by_id: HashMap<String, (usize, usize)>,
    role_definitions_by_id: FirstMatchIndex,
    subscriptions_by_id: FirstMatchIndex,
    type_styles_by_type: FirstMatchIndex,

    join_conflicts: Vec<JoinConflict>,
}

impl EntityStore {
    /// Load every table from `dir` and index it.  Fails before doing any
    /// indexing if a table is missing or malformed.
    pub fn load(dir: &Path) -> Result<EntityStore> {
        Ok(EntityStore::new(load_tables(dir)?))
    }

    pub fn new(tables: RawTables) -> EntityStore {
        let span = trace_span!("index_entity_store");
        let _span_guard = span.enter();

        let mut groups_by_id = FirstMatchIndex::new("groups", "GroupId");
        for (i, g) in tables.groups.iter().enumerate() {
            groups_by_id.insert(&g.group_id, i, |k| tables.groups[k] == *g);
        }

        let mut users_by_id = FirstMatchIndex::new("users", "UserId");
        for (i, u) in tables.users.iter().enumerate() {
            users_by_id.insert(&u.user_id, i, |k| tables.users[k] == *u);
        }

        // Distinct resources sharing a name are normal (same name in two
        // resource groups) and only ever resolve to the "Resource" category,
        // so the name index doesn't report conflicts.
        let mut resources_by_principal_id = FirstMatchIndex::new("resources", "PrincipalId");
        let mut resources_by_name = FirstMatchIndex::new("resources", "ResourceName");
        for (i, r) in tables.resources.iter().enumerate() {
            if let Some(principal_id) = &r.principal_id {
                resources_by_principal_id.insert(principal_id, i, |k| {
                    tables.resources[k].resource_name == r.resource_name
                });
            }
            resources_by_name.insert(&r.resource_name, i, |_| true);
        }

        let (service_principals, sps_by_object_id, app_roles_by_id, mut app_role_conflicts) =
            group_service_principals(&tables.service_principal_roles);

        let mut sps_by_display_name = FirstMatchIndex::new("service_principals", "AppDisplayName");
        for (i, sp) in service_principals.iter().enumerate() {
            sps_by_display_name.insert(&sp.app_display_name, i, |k| {
                service_principals[k].app_type == sp.app_type
            });
        }

        let mut role_definitions_by_id = FirstMatchIndex::new("role_definitions", "RoleDefinitionId");
        for (i, rd) in tables.role_definitions.iter().enumerate() {
            role_definitions_by_id.insert(&rd.role_definition_id, i, |k| {
                tables.role_definitions[k].role_name == rd.role_name
            });
        }

        let mut subscriptions_by_id = FirstMatchIndex::new("subscriptions", "SubscriptionId");
        for (i, s) in tables.subscriptions.iter().enumerate() {
            subscriptions_by_id.insert(&s.subscription_id, i, |k| {
                tables.subscriptions[k].display_name == s.display_name
            });
        }

        let mut type_styles_by_type = FirstMatchIndex::new("nodes_types", "Type");
        for (i, t) in tables.type_styles.iter().enumerate() {
            type_styles_by_type.insert(&t.type_name, i, |k| tables.type_styles[k] == *t);
        }

        let mut join_conflicts = vec![];
        groups_by_id.drain_conflicts(&mut join_conflicts);
        users_by_id.drain_conflicts(&mut join_conflicts);
        resources_by_principal_id.drain_conflicts(&mut join_conflicts);
        join_conflicts.append(&mut app_role_conflicts);
        sps_by_display_name.drain_conflicts(&mut join_conflicts);
        role_definitions_by_id.drain_conflicts(&mut join_conflicts);
        subscriptions_by_id.drain_conflicts(&mut join_conflicts);
        type_styles_by_type.drain_conflicts(&mut join_conflicts);

        for conflict in &join_conflicts {
            warn!(
                table = conflict.table,
                column = conflict.key_column,
                key = %conflict.key,
                rows = conflict.rows,
                "ambiguous join key, using the first row"
            );
        }

        EntityStore {
            tables,
            service_principals,
            groups_by_id,
            users_by_id,
            resources_by_principal_id,
            resources_by_name,
            sps_by_object_id,
            sps_by_display_name,
            app_roles_by_id,
            role_definitions_by_id,
            subscriptions_by_id,
            type_styles_by_type,
            join_conflicts,
        }
    }

    pub fn app_role_assignments(&self) -> &[AppRoleAssignment] {
        &self.tables.app_role_assignments
    }

    pub fn role_assignments(&self) -> &[AzureRoleAssignment] {
        &self.tables.role_assignments
    }

    pub fn service_principals(&self) -> &[ServicePrincipal] {
        &self.service_principals
    }

    pub fn join_conflicts(&self) -> &[JoinConflict] {
        &self.join_conflicts
    }

    pub fn group(&self, group_id: &str) -> Option<&Group> {
        self.groups_by_id.get(group_id).map(|i| &self.tables.groups[i])
    }

    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.users_by_id.get(user_id).map(|i| &self.tables.users[i])
    }

    /// The resource whose managed identity has this principal id.
    pub fn resource_by_principal_id(&self, principal_id: &str) -> Option<&Resource> {
        self.resources_by_principal_id
            .get(principal_id)
            .map(|i| &self.tables.resources[i])
    }

    pub fn resource_by_name(&self, name: &str) -> Option<&Resource> {
        self.resources_by_name
            .get(name)
            .map(|i| &self.tables.resources[i])
    }

    pub fn service_principal(&self, object_id: &str) -> Option<&ServicePrincipal> {
        self.sps_by_object_id
            .get(object_id)
            .map(|i| &self.service_principals[*i])
    }

    pub fn service_principal_by_display_name(&self, name: &str) -> Option<&ServicePrincipal> {
        self.sps_by_display_name
            .get(name)
            .map(|i| &self.service_principals[i])
    }

    /// The app role with this id along with the service principal exposing it.
    pub fn app_role(&self, app_role_id: &str) -> Option<(&ServicePrincipal, &AppRole)> {
        self.app_roles_by_id.get(app_role_id).map(|(sp_ix, role_ix)| {
            let sp = &self.service_principals[*sp_ix];
            (sp, &sp.app_roles[*role_ix])
        })
    }

    pub fn role_definition(&self, role_definition_id: &str) -> Option<&RoleDefinition> {
        self.role_definitions_by_id
            .get(role_definition_id)
            .map(|i| &self.tables.role_definitions[i])
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<&Subscription> {
        self.subscriptions_by_id
            .get(subscription_id)
            .map(|i| &self.tables.subscriptions[i])
    }

    pub fn type_style(&self, type_name: &str) -> Option<&TypeStyle> {
        self.type_styles_by_type
            .get(type_name)
            .map(|i| &self.tables.type_styles[i])
    }

    pub fn color_for(&self, type_name: &str) -> Option<String> {
        self.type_style(type_name).map(|t| t.color.clone())
    }
}

/// Regroup the flattened service principal rows by ObjectId, indexing each
/// app role by its id.  An app role id claimed by two different principals
/// (or by two different roles) keeps the first claim and is reported.
fn group_service_principals(
    rows: &[ServicePrincipalRoleRow],
) -> (
    Vec<ServicePrincipal>,
    HashMap<String, usize>,
    HashMap<String, (usize, usize)>,
    Vec<JoinConflict>,
) {
    let mut sps: Vec<ServicePrincipal> = vec![];
    let mut by_object_id: HashMap<String, usize> = HashMap::new();
    let mut roles_by_id: HashMap<String, (usize, usize)> = HashMap::new();
    let mut role_conflicts: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let sp_ix = match by_object_id.get(&row.object_id) {
            Some(ix) => *ix,
            None => {
                sps.push(ServicePrincipal::from_row(row));
                by_object_id.insert(row.object_id.clone(), sps.len() - 1);
                sps.len() - 1
            }
        };

        let app_role_id = match &row.app_role_id {
            Some(id) if !id.is_empty() => id,
            _ => continue,
        };
        let role = AppRole {
            app_role_id: app_role_id.clone(),
            name: row.app_role_name.clone(),
            display_name: row.app_role_display_name.clone(),
            description: row.app_role_description.clone(),
            origin: row.app_role_origin.clone(),
        };

        match roles_by_id.get(app_role_id) {
            None => {
                sps[sp_ix].app_roles.push(role);
                let role_ix = sps[sp_ix].app_roles.len() - 1;
                roles_by_id.insert(app_role_id.clone(), (sp_ix, role_ix));
            }
            Some(&(kept_sp, kept_role)) => {
                let kept = &sps[kept_sp];
                let same = kept_sp == sp_ix && kept.app_roles[kept_role] == role;
                let same_meaning = kept.app_roles[kept_role].name == role.name
                    && kept.app_type == sps[sp_ix].app_type;
                if !same && !same_meaning {
                    *role_conflicts.entry(app_role_id.clone()).or_insert(1) += 1;
                }
                if kept_sp != sp_ix {
                    // Still list the role under its own principal; only the
                    // id → role lookup is first-match.
                    sps[sp_ix].app_roles.push(role);
                }
            }
        }
    }

    let mut conflict_keys: Vec<(String, usize)> = role_conflicts.into_iter().collect();
    conflict_keys.sort();
    let conflicts = conflict_keys
        .into_iter()
        .map(|(key, rows)| JoinConflict {
            table: "service_principals_roles",
            key_column: "AppRoleId",
            key,
            rows,
        })
        .collect();

    (sps, by_object_id, roles_by_id, conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp_row(object_id: &str, name: &str, app_type: &str, role: Option<(&str, &str)>) -> ServicePrincipalRoleRow {
        ServicePrincipalRoleRow {
            object_id: object_id.to_string(),
            app_id: Some(format!("app-{}", object_id)),
            app_display_name: name.to_string(),
            app_type: Some(app_type.to_string()),
            app_role_id: role.map(|(id, _)| id.to_string()),
            app_role_name: role.map(|(_, n)| n.to_string()),
            ..ServicePrincipalRoleRow::default()
        }
    }

    #[test]
    fn test_service_principal_rows_are_regrouped() {
        let mut tables = RawTables::default();
        tables.service_principal_roles = vec![
            sp_row("sp1", "Payroll", "Application", Some(("r-read", "Payroll.Read"))),
            sp_row("sp1", "Payroll", "Application", Some(("r-write", "Payroll.Write"))),
            sp_row("sp2", "vm-identity", "ManagedIdentity", None),
        ];
        let store = EntityStore::new(tables);

        assert_eq!(store.service_principals().len(), 2);
        assert_eq!(store.service_principal("sp1").unwrap().app_roles.len(), 2);
        assert!(store.service_principal("sp2").unwrap().app_roles.is_empty());

        let (owner, role) = store.app_role("r-write").unwrap();
        assert_eq!(owner.object_id, "sp1");
        assert_eq!(role.name.as_deref(), Some("Payroll.Write"));
        assert!(store.join_conflicts().is_empty());
    }

    #[test]
    fn test_colliding_app_role_ids_keep_first_and_report() {
        let mut tables = RawTables::default();
        tables.service_principal_roles = vec![
            sp_row("sp1", "Payroll", "Application", Some(("dup", "Payroll.Read"))),
            sp_row("sp2", "Billing", "Legacy", Some(("dup", "Billing.Admin"))),
        ];
        let store = EntityStore::new(tables);

        let (owner, role) = store.app_role("dup").unwrap();
        assert_eq!(owner.app_display_name, "Payroll");
        assert_eq!(role.name.as_deref(), Some("Payroll.Read"));
        assert_eq!(
            store.join_conflicts(),
            &[JoinConflict {
                table: "service_principals_roles",
                key_column: "AppRoleId",
                key: "dup".to_string(),
                rows: 2,
            }]
        );
    }

    #[test]
    fn test_exact_duplicate_rows_are_not_conflicts() {
        let mut tables = RawTables::default();
        let user = User {
            user_id: "u1".to_string(),
            display_name: "Alice".to_string(),
            ..User::default()
        };
        tables.users = vec![user.clone(), user];
        tables.role_definitions = vec![
            RoleDefinition {
                role_definition_id: "r1".to_string(),
                role_name: "Reader".to_string(),
                ..RoleDefinition::default()
            },
            RoleDefinition {
                role_definition_id: "r1".to_string(),
                role_name: "Owner".to_string(),
                ..RoleDefinition::default()
            },
        ];
        let store = EntityStore::new(tables);

        assert_eq!(store.user("u1").unwrap().display_name, "Alice");
        assert_eq!(store.role_definition("r1").unwrap().role_name, "Reader");
        assert_eq!(store.join_conflicts().len(), 1);
        assert_eq!(store.join_conflicts()[0].table, "role_definitions");
    }

    #[test]
    fn test_resource_without_identity_is_not_indexed_by_principal() {
        let mut tables = RawTables::default();
        tables.resources = vec![Resource {
            resource_id: "/subscriptions/s1/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/st1".to_string(),
            resource_name: "st1".to_string(),
            ..Resource::default()
        }];
        let store = EntityStore::new(tables);

        assert!(store.resource_by_name("st1").is_some());
        assert!(store.resource_by_principal_id("").is_none());
    }
}
