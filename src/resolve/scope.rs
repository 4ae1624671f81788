use regex::Regex;

use super::{categories, Resolution};
use crate::entity_store::EntityStore;

/// Classify a role assignment scope path without consulting any tables.
///
/// Rules are tried most-specific-structure first and the first match wins.
/// The management group rule is only anchored at the start, so anything
/// nested under a management group is attributed to the group.
pub fn classify_scope(scope: &str) -> Resolution {
    lazy_static! {
        static ref RE_MANAGEMENT_GROUP: Regex =
            Regex::new(r"^/providers/Microsoft\.Management/managementGroups/([^/]+)").unwrap();
        static ref RE_SUBSCRIPTION: Regex = Regex::new(r"^/subscriptions/([^/]+)$").unwrap();
        static ref RE_RESOURCE_GROUP: Regex =
            Regex::new(r"^/subscriptions/[^/]+/resourceGroups/([^/]+)$").unwrap();
        static ref RE_RESOURCE: Regex =
            Regex::new(r"^/subscriptions/[^/]+/resourceGroups/[^/]+/providers/.*/([^/]+)$").unwrap();
    }

    if scope == "/" {
        return Resolution::new("Root", categories::MANAGEMENT_GROUP);
    }

    let rules: [(&Regex, &str); 4] = [
        (&*RE_MANAGEMENT_GROUP, categories::MANAGEMENT_GROUP),
        (&*RE_SUBSCRIPTION, categories::SUBSCRIPTION),
        (&*RE_RESOURCE_GROUP, categories::RESOURCE_GROUP),
        (&*RE_RESOURCE, categories::RESOURCE),
    ];
    for (re, category) in rules.iter() {
        if let Some(caps) = re.captures(scope) {
            if let Some(name) = caps.get(1) {
                return Resolution::new(name.as_str(), *category);
            }
        }
    }

    Resolution::new(categories::UNKNOWN, categories::UNKNOWN)
}

/// Classify a scope path and swap subscription ids for their display names
/// when the subscription is known.
pub fn resolve_scope(store: &EntityStore, scope: &str) -> Resolution {
    let classified = classify_scope(scope);
    if classified.category != categories::SUBSCRIPTION {
        return classified;
    }
    match store.subscription(&classified.display_name) {
        Some(sub) => Resolution::new(&sub.display_name, categories::SUBSCRIPTION),
        None => classified,
    }
}
