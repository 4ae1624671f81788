use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::errors::{AccessGraphError, ErrorLayer, Result};

/// The normalized record sets the pipeline consumes.  Each variant is stored
/// on disk as a JSON array of rows in its own file inside the data directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    Subscriptions,
    Groups,
    Users,
    AppRoleAssignments,
    ServicePrincipalRoles,
    Resources,
    RoleAssignments,
    RoleDefinitions,
    NodeTypes,
}

impl TableKind {
    pub const ALL: [TableKind; 9] = [
        TableKind::Subscriptions,
        TableKind::Groups,
        TableKind::Users,
        TableKind::AppRoleAssignments,
        TableKind::ServicePrincipalRoles,
        TableKind::Resources,
        TableKind::RoleAssignments,
        TableKind::RoleDefinitions,
        TableKind::NodeTypes,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            TableKind::Subscriptions => "subscriptions.json",
            TableKind::Groups => "groups.json",
            TableKind::Users => "users.json",
            TableKind::AppRoleAssignments => "app_role_assignments.json",
            TableKind::ServicePrincipalRoles => "service_principals_roles.json",
            TableKind::Resources => "resources.json",
            TableKind::RoleAssignments => "role_assignments.json",
            TableKind::RoleDefinitions => "role_definitions.json",
            TableKind::NodeTypes => "nodes_types.json",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subscription {
    pub subscription_id: String,
    pub tenant_id: Option<String>,
    pub display_name: String,
    pub state: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Group {
    pub group_id: String,
    pub display_name: String,
    pub created_date: Option<String>,
    /// Recorded category; ingestion always writes "Group".
    #[serde(rename = "Type")]
    pub group_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    pub user_id: String,
    pub user_principal_name: Option<String>,
    pub display_name: String,
    #[serde(rename = "Type")]
    pub user_type: Option<String>,
}

/// An ARM resource.  `principal_id` is only present when the resource has a
/// managed identity attached.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    pub resource_id: String,
    pub resource_name: String,
    pub resource_type: Option<String>,
    pub resource_location: Option<String>,
    pub principal_id: Option<String>,
    pub principal_type: Option<String>,
}

/// One row per (service principal, app role) pair.  A service principal that
/// defines no app roles still gets a single row with all the role columns
/// empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServicePrincipalRoleRow {
    pub object_id: String,
    pub app_id: Option<String>,
    pub app_display_name: String,
    pub app_creation_date: Option<String>,
    pub app_type: Option<String>,
    pub app_role_description: Option<String>,
    pub app_role_display_name: Option<String>,
    pub app_role_id: Option<String>,
    pub app_role_origin: Option<String>,
    pub app_role_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppRoleAssignment {
    pub app_role_id: String,
    pub created_date_time: Option<String>,
    pub principal_name: String,
    pub principal_id: String,
    pub principal_type: Option<String>,
    pub resource_name: String,
    /// Object id of the service principal exposing the role.
    pub resource_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AzureRoleAssignment {
    pub subscription_id: Option<String>,
    pub role_assignment_id: String,
    pub role_assignment_type: Option<String>,
    pub role_assignment_name: Option<String>,
    pub role_definition_id: String,
    pub principal_id: String,
    pub principal_type: Option<String>,
    pub scope: String,
    pub condition: Option<String>,
    pub condition_version: Option<String>,
    pub created_on: Option<String>,
    pub updated_on: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    #[serde(rename = "DelegatedMIResourceId")]
    pub delegated_mi_resource_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleDefinition {
    pub subscription_id: Option<String>,
    pub role_definition_id: String,
    pub role_definition_type: Option<String>,
    pub role_definition_name: Option<String>,
    pub role_name: String,
    pub role_type: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub assignable_scopes: Vec<String>,
    pub created_on: Option<String>,
    pub updated_on: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeStyle {
    #[serde(rename = "Type")]
    pub type_name: String,
    #[serde(rename = "Color")]
    pub color: String,
}

impl TypeStyle {
    fn new(type_name: &str, color: &str) -> Self {
        TypeStyle {
            type_name: type_name.to_string(),
            color: color.to_string(),
        }
    }
}

/// The stock category palette written by `write-types` and `normalize`.
pub fn default_type_styles() -> Vec<TypeStyle> {
    vec![
        TypeStyle::new("User", "cyan"),
        TypeStyle::new("Group", "blue"),
        TypeStyle::new("ServicePrincipal", "gray"),
        TypeStyle::new("Application", "red"),
        TypeStyle::new("ManagementGroup", "brown"),
        TypeStyle::new("Subscription", "purple"),
        TypeStyle::new("ResourceGroup", "yellow"),
        TypeStyle::new("Resource", "orange"),
    ]
}

/// All of the record sets for one snapshot, exactly as loaded.
#[derive(Clone, Debug, Default)]
pub struct RawTables {
    pub subscriptions: Vec<Subscription>,
    pub groups: Vec<Group>,
    pub users: Vec<User>,
    pub app_role_assignments: Vec<AppRoleAssignment>,
    pub service_principal_roles: Vec<ServicePrincipalRoleRow>,
    pub resources: Vec<Resource>,
    pub role_assignments: Vec<AzureRoleAssignment>,
    pub role_definitions: Vec<RoleDefinition>,
    pub type_styles: Vec<TypeStyle>,
}

/// Return the file names of every required table missing from `dir`, in
/// `TableKind::ALL` order.
pub fn missing_tables(dir: &Path) -> Vec<String> {
    TableKind::ALL
        .iter()
        .map(|kind| kind.file_name())
        .filter(|name| !dir.join(name).is_file())
        .map(|name| name.to_string())
        .collect()
}

fn read_table<T: DeserializeOwned>(dir: &Path, kind: TableKind) -> Result<Vec<T>> {
    let path = dir.join(kind.file_name());
    let file = File::open(&path)?;
    let rows: Vec<T> = serde_json::from_reader(BufReader::new(file)).map_err(|err| {
        AccessGraphError::sticky(
            ErrorLayer::DataLayer,
            format!("Malformed table {}: {}", kind.file_name(), err),
        )
    })?;
    trace!(table = kind.file_name(), rows = rows.len(), "read table");
    Ok(rows)
}

/// Load every table from `dir`.  All of the files are checked for existence
/// before any of them are parsed so that a caller hears about every missing
/// table in one go.
pub fn load_tables(dir: &Path) -> Result<RawTables> {
    let span = info_span!("load_tables", dir = %dir.display());
    let _span_guard = span.enter();

    let missing = missing_tables(dir);
    if !missing.is_empty() {
        return Err(AccessGraphError::MissingInputs(missing));
    }

    let tables = RawTables {
        subscriptions: read_table(dir, TableKind::Subscriptions)?,
        groups: read_table(dir, TableKind::Groups)?,
        users: read_table(dir, TableKind::Users)?,
        app_role_assignments: read_table(dir, TableKind::AppRoleAssignments)?,
        service_principal_roles: read_table(dir, TableKind::ServicePrincipalRoles)?,
        resources: read_table(dir, TableKind::Resources)?,
        role_assignments: read_table(dir, TableKind::RoleAssignments)?,
        role_definitions: read_table(dir, TableKind::RoleDefinitions)?,
        type_styles: read_table(dir, TableKind::NodeTypes)?,
    };
    info!(
        role_assignments = tables.role_assignments.len(),
        app_role_assignments = tables.app_role_assignments.len(),
        "loaded tables"
    );
    Ok(tables)
}

pub fn write_table<T: Serialize>(dir: &Path, kind: TableKind, rows: &[T]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let file = File::create(dir.join(kind.file_name()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, rows)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Write every table in `tables` into `dir`, creating it if needed.
pub fn write_tables(dir: &Path, tables: &RawTables) -> Result<()> {
    write_table(dir, TableKind::Subscriptions, &tables.subscriptions)?;
    write_table(dir, TableKind::Groups, &tables.groups)?;
    write_table(dir, TableKind::Users, &tables.users)?;
    write_table(dir, TableKind::AppRoleAssignments, &tables.app_role_assignments)?;
    write_table(dir, TableKind::ServicePrincipalRoles, &tables.service_principal_roles)?;
    write_table(dir, TableKind::Resources, &tables.resources)?;
    write_table(dir, TableKind::RoleAssignments, &tables.role_assignments)?;
    write_table(dir, TableKind::RoleDefinitions, &tables.role_definitions)?;
    write_table(dir, TableKind::NodeTypes, &tables.type_styles)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::temp_dir::TempDir;

    #[test]
    fn test_missing_tables_are_all_reported() {
        let dir = TempDir::unique("tables-missing");
        write_table(&dir, TableKind::Users, &Vec::<User>::new()).unwrap();
        write_table(&dir, TableKind::NodeTypes, &default_type_styles()).unwrap();

        match load_tables(&dir) {
            Err(AccessGraphError::MissingInputs(missing)) => {
                assert_eq!(missing.len(), 7);
                assert!(missing.contains(&"groups.json".to_string()));
                assert!(!missing.contains(&"users.json".to_string()));
                assert!(!missing.contains(&"nodes_types.json".to_string()));
            }
            other => panic!("expected MissingInputs, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_table_names_the_file() {
        let dir = TempDir::unique("tables-malformed");
        write_tables(&dir, &RawTables::default()).unwrap();
        std::fs::write(dir.join("users.json"), "{\"not\": \"an array\"}").unwrap();

        let err = load_tables(&dir).unwrap_err();
        assert!(err.to_string().contains("users.json"), "{}", err);
    }

    #[test]
    fn test_nullable_columns_may_be_absent() {
        let rows: Vec<Resource> = serde_json::from_str(
            r#"[{"ResourceId": "/subscriptions/s1/resourceGroups/rg/providers/Microsoft.Web/sites/app1",
                 "ResourceName": "app1", "PrincipalId": null}]"#,
        )
        .unwrap();
        assert_eq!(rows[0].resource_name, "app1");
        assert_eq!(rows[0].principal_id, None);
        assert_eq!(rows[0].resource_type, None);
    }

    #[test]
    fn test_round_trip_through_directory() {
        let dir = TempDir::unique("tables-roundtrip");
        let mut tables = RawTables::default();
        tables.users.push(User {
            user_id: "u1".to_string(),
            user_principal_name: Some("alice@example.com".to_string()),
            display_name: "Alice".to_string(),
            user_type: Some("User".to_string()),
        });
        tables.type_styles = default_type_styles();
        write_tables(&dir, &tables).unwrap();

        let loaded = load_tables(&dir).unwrap();
        assert_eq!(loaded.users, tables.users);
        assert_eq!(loaded.type_styles.len(), 8);
    }
}
