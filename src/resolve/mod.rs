use serde::Serialize;

pub mod principal;
pub mod scope;

/// Category names shared by the resolvers, the edge builder and the type
/// palette.  Service principal categories come straight from the data
/// (`servicePrincipalType`) so the set is open-ended.
pub mod categories {
    pub const USER: &str = "User";
    pub const GROUP: &str = "Group";
    pub const SERVICE_PRINCIPAL: &str = "ServicePrincipal";
    pub const APPLICATION: &str = "Application";
    pub const MANAGED_IDENTITY: &str = "ManagedIdentity";
    pub const MANAGEMENT_GROUP: &str = "ManagementGroup";
    pub const SUBSCRIPTION: &str = "Subscription";
    pub const RESOURCE_GROUP: &str = "ResourceGroup";
    pub const RESOURCE: &str = "Resource";
    pub const UNKNOWN: &str = "Unknown";
}

/// A human-readable name for an identifier plus the category it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub display_name: String,
    pub category: String,
}

impl Resolution {
    pub fn new(display_name: impl Into<String>, category: impl Into<String>) -> Self {
        Resolution {
            display_name: display_name.into(),
            category: category.into(),
        }
    }

    pub fn into_pair(self) -> (String, String) {
        (self.display_name, self.category)
    }
}

/// Recorded types can be absent or blank; neither may leak into an edge.
pub fn category_or_unknown(recorded: Option<&str>) -> String {
    match recorded {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => categories::UNKNOWN.to_string(),
    }
}

#[test]
fn test_category_or_unknown() {
    assert_eq!(category_or_unknown(Some("User")), "User");
    assert_eq!(category_or_unknown(Some("  ")), "Unknown");
    assert_eq!(category_or_unknown(None), "Unknown");
}
