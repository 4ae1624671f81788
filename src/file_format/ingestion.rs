/*!
Normalization of raw management-plane and identity-graph payloads into the
row types of `tables`.

Fetching is somebody else's job.  We expect a directory of list responses as
they came off the wire, each a JSON object with a `value` array:

```text
raw/
  subscriptions.json             GET /subscriptions
  service_principals.json        GET /servicePrincipals
  users.json                     GET /users
  groups.json                    GET /groups
  resources/<subId>.json         GET /subscriptions/<subId>/resources
  role_assignments/<subId>.json  GET .../Microsoft.Authorization/roleAssignments
  role_definitions/<subId>.json  GET .../Microsoft.Authorization/roleDefinitions
  app_role_assignments/<appId>.json
                                 GET /servicePrincipals(appId='<appId>')/appRoleAssignedTo
```

A per-subscription or per-app file that is absent is treated like an empty
list, matching how a failed list call is treated by the fetchers.
*/

use std::{collections::BTreeSet, fs::File, io::BufReader, path::Path};

use serde_json::Value;

use super::tables::{
    default_type_styles, AppRoleAssignment, AzureRoleAssignment, Group, RawTables, Resource,
    RoleDefinition, ServicePrincipalRoleRow, Subscription, User,
};
use crate::errors::{AccessGraphError, ErrorLayer, Result};

const TOP_LEVEL_FILES: [&str; 4] = [
    "subscriptions.json",
    "service_principals.json",
    "users.json",
    "groups.json",
];

fn value_items(doc: &Value) -> &[Value] {
    match doc.get("value") {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

fn optional_str(item: &Value, pointer: &str) -> Option<String> {
    match item.pointer(pointer) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn required_str(item: &Value, pointer: &str, what: &str) -> Result<String> {
    optional_str(item, pointer).ok_or_else(|| {
        AccessGraphError::sticky(
            ErrorLayer::DataLayer,
            format!("{} record is missing {}", what, pointer),
        )
    })
}

pub fn normalize_subscriptions(doc: &Value) -> Result<Vec<Subscription>> {
    value_items(doc)
        .iter()
        .map(|item| {
            Ok(Subscription {
                subscription_id: required_str(item, "/subscriptionId", "subscription")?,
                tenant_id: optional_str(item, "/tenantId"),
                display_name: required_str(item, "/displayName", "subscription")?,
                state: optional_str(item, "/state"),
            })
        })
        .collect()
}

pub fn normalize_role_assignments(
    subscription_id: &str,
    doc: &Value,
) -> Result<Vec<AzureRoleAssignment>> {
    value_items(doc)
        .iter()
        .map(|item| {
            Ok(AzureRoleAssignment {
                subscription_id: Some(subscription_id.to_string()),
                role_assignment_id: required_str(item, "/id", "role assignment")?,
                role_assignment_type: optional_str(item, "/type"),
                role_assignment_name: optional_str(item, "/name"),
                role_definition_id: required_str(
                    item,
                    "/properties/roleDefinitionId",
                    "role assignment",
                )?,
                principal_id: required_str(item, "/properties/principalId", "role assignment")?,
                principal_type: optional_str(item, "/properties/principalType"),
                scope: required_str(item, "/properties/scope", "role assignment")?,
                condition: optional_str(item, "/properties/condition"),
                condition_version: optional_str(item, "/properties/conditionVersion"),
                created_on: optional_str(item, "/properties/createdOn"),
                updated_on: optional_str(item, "/properties/updatedOn"),
                created_by: optional_str(item, "/properties/createdBy"),
                updated_by: optional_str(item, "/properties/updatedBy"),
                delegated_mi_resource_id: optional_str(
                    item,
                    "/properties/delegatedManagedIdentityResourceId",
                ),
                description: optional_str(item, "/properties/description"),
            })
        })
        .collect()
}

pub fn normalize_role_definitions(
    subscription_id: &str,
    doc: &Value,
) -> Result<Vec<RoleDefinition>> {
    value_items(doc)
        .iter()
        .map(|item| {
            let assignable_scopes = match item.pointer("/properties/assignableScopes") {
                Some(Value::Array(scopes)) => scopes
                    .iter()
                    .filter_map(|s| s.as_str().map(|s| s.to_string()))
                    .collect(),
                _ => vec![],
            };
            Ok(RoleDefinition {
                subscription_id: Some(subscription_id.to_string()),
                role_definition_id: required_str(item, "/id", "role definition")?,
                role_definition_type: optional_str(item, "/type"),
                role_definition_name: optional_str(item, "/name"),
                role_name: required_str(item, "/properties/roleName", "role definition")?,
                role_type: optional_str(item, "/properties/type"),
                description: optional_str(item, "/properties/description"),
                assignable_scopes,
                created_on: optional_str(item, "/properties/createdOn"),
                updated_on: optional_str(item, "/properties/updatedOn"),
                created_by: optional_str(item, "/properties/createdBy"),
                updated_by: optional_str(item, "/properties/updatedBy"),
            })
        })
        .collect()
}

pub fn normalize_resources(doc: &Value) -> Result<Vec<Resource>> {
    value_items(doc)
        .iter()
        .map(|item| {
            Ok(Resource {
                resource_id: required_str(item, "/id", "resource")?,
                resource_name: required_str(item, "/name", "resource")?,
                resource_type: optional_str(item, "/type"),
                resource_location: optional_str(item, "/location"),
                principal_id: optional_str(item, "/identity/principalId"),
                principal_type: optional_str(item, "/identity/type"),
            })
        })
        .collect()
}

/// Flatten service principals into one row per app role.  Also returns the
/// app ids of every principal that exposes at least one role, since those are
/// the only ones worth asking for role assignments.
pub fn normalize_service_principals(
    doc: &Value,
) -> Result<(Vec<ServicePrincipalRoleRow>, BTreeSet<String>)> {
    let mut rows = vec![];
    let mut app_ids = BTreeSet::new();

    for item in value_items(doc) {
        let base = ServicePrincipalRoleRow {
            object_id: required_str(item, "/id", "service principal")?,
            app_id: optional_str(item, "/appId"),
            app_display_name: required_str(item, "/displayName", "service principal")?,
            app_creation_date: optional_str(item, "/createdDateTime"),
            app_type: optional_str(item, "/servicePrincipalType"),
            ..ServicePrincipalRoleRow::default()
        };

        let roles = match item.get("appRoles") {
            Some(Value::Array(roles)) if !roles.is_empty() => roles,
            _ => {
                rows.push(base);
                continue;
            }
        };

        for role in roles {
            rows.push(ServicePrincipalRoleRow {
                app_role_description: optional_str(role, "/description"),
                app_role_display_name: optional_str(role, "/displayName"),
                app_role_id: optional_str(role, "/id"),
                app_role_origin: optional_str(role, "/origin"),
                app_role_name: optional_str(role, "/value"),
                ..base.clone()
            });
        }
        if let Some(app_id) = &base.app_id {
            app_ids.insert(app_id.clone());
        }
    }

    Ok((rows, app_ids))
}

pub fn normalize_app_role_assignments(doc: &Value) -> Result<Vec<AppRoleAssignment>> {
    value_items(doc)
        .iter()
        .map(|item| {
            Ok(AppRoleAssignment {
                app_role_id: required_str(item, "/appRoleId", "app role assignment")?,
                created_date_time: optional_str(item, "/createdDateTime"),
                principal_name: required_str(
                    item,
                    "/principalDisplayName",
                    "app role assignment",
                )?,
                principal_id: required_str(item, "/principalId", "app role assignment")?,
                principal_type: optional_str(item, "/principalType"),
                resource_name: required_str(item, "/resourceDisplayName", "app role assignment")?,
                resource_id: optional_str(item, "/resourceId"),
            })
        })
        .collect()
}

pub fn normalize_users(doc: &Value) -> Result<Vec<User>> {
    value_items(doc)
        .iter()
        .map(|item| {
            Ok(User {
                user_id: required_str(item, "/id", "user")?,
                user_principal_name: optional_str(item, "/userPrincipalName"),
                display_name: required_str(item, "/displayName", "user")?,
                user_type: Some("User".to_string()),
            })
        })
        .collect()
}

pub fn normalize_groups(doc: &Value) -> Result<Vec<Group>> {
    value_items(doc)
        .iter()
        .map(|item| {
            Ok(Group {
                group_id: required_str(item, "/id", "group")?,
                display_name: required_str(item, "/displayName", "group")?,
                created_date: optional_str(item, "/createdDateTime"),
                group_type: Some("Group".to_string()),
            })
        })
        .collect()
}

fn read_doc(path: &Path) -> Result<Value> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| {
        AccessGraphError::sticky(
            ErrorLayer::DataLayer,
            format!("Malformed payload {}: {}", path.display(), err),
        )
    })
}

/// Per-subscription and per-app payloads are optional.
fn read_optional_doc(path: &Path) -> Result<Value> {
    if path.is_file() {
        read_doc(path)
    } else {
        trace!(path = %path.display(), "no payload, treating as empty");
        Ok(Value::Null)
    }
}

/// Normalize a whole raw dump directory (see the module docs for the layout)
/// into a table set, including the default type palette.
pub fn normalize_raw_dir(raw_dir: &Path) -> Result<RawTables> {
    let span = info_span!("normalize_raw_dir", raw_dir = %raw_dir.display());
    let _span_guard = span.enter();

    let missing: Vec<String> = TOP_LEVEL_FILES
        .iter()
        .filter(|name| !raw_dir.join(name).is_file())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AccessGraphError::MissingInputs(missing));
    }

    let mut tables = RawTables {
        subscriptions: normalize_subscriptions(&read_doc(&raw_dir.join("subscriptions.json"))?)?,
        users: normalize_users(&read_doc(&raw_dir.join("users.json"))?)?,
        groups: normalize_groups(&read_doc(&raw_dir.join("groups.json"))?)?,
        type_styles: default_type_styles(),
        ..RawTables::default()
    };

    let subscription_ids: Vec<String> = tables
        .subscriptions
        .iter()
        .map(|s| s.subscription_id.clone())
        .collect();
    for sub in &subscription_ids {
        let file_name = format!("{}.json", sub);
        tables.resources.extend(normalize_resources(&read_optional_doc(
            &raw_dir.join("resources").join(&file_name),
        )?)?);
        tables.role_assignments.extend(normalize_role_assignments(
            sub,
            &read_optional_doc(&raw_dir.join("role_assignments").join(&file_name))?,
        )?);
        tables.role_definitions.extend(normalize_role_definitions(
            sub,
            &read_optional_doc(&raw_dir.join("role_definitions").join(&file_name))?,
        )?);
    }

    let (sp_rows, app_ids) =
        normalize_service_principals(&read_doc(&raw_dir.join("service_principals.json"))?)?;
    tables.service_principal_roles = sp_rows;
    for app_id in &app_ids {
        tables
            .app_role_assignments
            .extend(normalize_app_role_assignments(&read_optional_doc(
                &raw_dir
                    .join("app_role_assignments")
                    .join(format!("{}.json", app_id)),
            )?)?);
    }

    info!(
        subscriptions = tables.subscriptions.len(),
        service_principal_rows = tables.service_principal_roles.len(),
        "normalized raw payloads"
    );
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::temp_dir::TempDir;
    use serde_json::json;

    #[test]
    fn test_service_principal_without_roles_gets_one_row() {
        let doc = json!({
            "value": [
                {
                    "id": "sp-obj-1",
                    "appId": "app-1",
                    "displayName": "Payroll",
                    "createdDateTime": "2023-01-01T00:00:00Z",
                    "servicePrincipalType": "Application",
                    "appRoles": [
                        {"id": "role-a", "value": "Payroll.Read", "displayName": "Read",
                         "description": "Read payroll", "origin": "Application"},
                        {"id": "role-b", "value": "Payroll.Write", "displayName": "Write",
                         "description": "Write payroll", "origin": "Application"}
                    ]
                },
                {
                    "id": "sp-obj-2",
                    "appId": "app-2",
                    "displayName": "vm-identity",
                    "servicePrincipalType": "ManagedIdentity",
                    "appRoles": []
                }
            ]
        });

        let (rows, app_ids) = normalize_service_principals(&doc).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].app_role_name.as_deref(), Some("Payroll.Read"));
        assert_eq!(rows[1].app_role_id.as_deref(), Some("role-b"));
        assert_eq!(rows[2].object_id, "sp-obj-2");
        assert_eq!(rows[2].app_role_id, None);
        assert_eq!(app_ids.into_iter().collect::<Vec<_>>(), vec!["app-1".to_string()]);
    }

    #[test]
    fn test_resource_identity_is_optional() {
        let doc = json!({
            "value": [
                {"id": "/subscriptions/s1/resourceGroups/rg/providers/Microsoft.Web/sites/web1",
                 "name": "web1", "type": "Microsoft.Web/sites", "location": "westeurope",
                 "identity": {"principalId": "mi-1", "type": "SystemAssigned"}},
                {"id": "/subscriptions/s1/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/st1",
                 "name": "st1", "type": "Microsoft.Storage/storageAccounts", "location": "westeurope"}
            ]
        });

        let resources = normalize_resources(&doc).unwrap();
        assert_eq!(resources[0].principal_id.as_deref(), Some("mi-1"));
        assert_eq!(resources[0].principal_type.as_deref(), Some("SystemAssigned"));
        assert_eq!(resources[1].principal_id, None);
    }

    #[test]
    fn test_role_assignment_properties_are_flattened() {
        let doc = json!({
            "value": [{
                "id": "/subscriptions/s1/providers/Microsoft.Authorization/roleAssignments/ra1",
                "type": "Microsoft.Authorization/roleAssignments",
                "name": "ra1",
                "properties": {
                    "roleDefinitionId": "/subscriptions/s1/providers/Microsoft.Authorization/roleDefinitions/rd1",
                    "principalId": "u1",
                    "principalType": "User",
                    "scope": "/subscriptions/s1",
                    "condition": null,
                    "createdOn": "2024-02-01T00:00:00Z"
                }
            }]
        });

        let assignments = normalize_role_assignments("s1", &doc).unwrap();
        assert_eq!(assignments.len(), 1);
        let ra = &assignments[0];
        assert_eq!(ra.subscription_id.as_deref(), Some("s1"));
        assert_eq!(ra.principal_id, "u1");
        assert_eq!(ra.scope, "/subscriptions/s1");
        assert_eq!(ra.condition, None);
        assert_eq!(ra.created_on.as_deref(), Some("2024-02-01T00:00:00Z"));
    }

    #[test]
    fn test_missing_required_field_is_a_data_error() {
        let doc = json!({"value": [{"displayName": "nameless"}]});
        let err = normalize_users(&doc).unwrap_err();
        assert!(err.to_string().contains("/id"), "{}", err);
    }

    #[test]
    fn test_normalize_raw_dir() {
        let raw = TempDir::unique("raw-dump");
        let write = |rel: &str, value: Value| {
            let path = raw.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, value.to_string()).unwrap();
        };
        write(
            "subscriptions.json",
            json!({"value": [{"subscriptionId": "s1", "tenantId": "t1",
                              "displayName": "Prod", "state": "Enabled"}]}),
        );
        write("users.json", json!({"value": [{"id": "u1", "displayName": "Alice",
                                              "userPrincipalName": "alice@example.com"}]}));
        write("groups.json", json!({"value": []}));
        write("service_principals.json", json!({"value": []}));
        write(
            "role_definitions/s1.json",
            json!({"value": [{"id": "r1", "properties": {"roleName": "Reader", "type": "BuiltInRole"}}]}),
        );

        let tables = normalize_raw_dir(&raw).unwrap();
        assert_eq!(tables.subscriptions[0].display_name, "Prod");
        assert_eq!(tables.users[0].user_type.as_deref(), Some("User"));
        assert_eq!(tables.role_definitions[0].role_name, "Reader");
        assert!(tables.role_assignments.is_empty());
        assert!(tables.resources.is_empty());
        assert_eq!(tables.type_styles.len(), 8);
    }

    #[test]
    fn test_normalize_raw_dir_requires_top_level_files() {
        let raw = TempDir::unique("raw-empty");
        match normalize_raw_dir(&raw) {
            Err(AccessGraphError::MissingInputs(missing)) => assert_eq!(missing.len(), 4),
            other => panic!("expected MissingInputs, got {:?}", other),
        }
    }
}
