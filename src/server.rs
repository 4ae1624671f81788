use std::{collections::HashMap, path::Path, sync::Arc};

use axum::{
    extract::Query,
    http::{header, HeaderMap, HeaderValue},
    response::{Html, IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use axum_macros::debug_handler;
use liquid::Template;
use serde_json::Value;

use crate::{
    config::Config,
    edges::build_edges,
    entity_store::EntityStore,
    errors::Result,
    graph::project_with,
    logging::{logging_active, LoggedSpan},
    templating::{builder::build_and_parse_permission_graph, render_graph_page},
};

/// Everything a request needs.  The store is loaded once and only ever read,
/// so requests share it without locking.
pub struct ServerState {
    pub store: Arc<EntityStore>,
    pub config: Config,
    pub template: Template,
}

impl ServerState {
    pub fn new(store: EntityStore, config: Config) -> Result<ServerState> {
        Ok(ServerState {
            store: Arc::new(store),
            config,
            template: build_and_parse_permission_graph()?,
        })
    }

    /// Load the data directory and parse the page template, failing on the
    /// first problem so the server never starts half-configured.
    pub fn load(data_dir: &Path, config: Config) -> Result<ServerState> {
        ServerState::new(EntityStore::load(data_dir)?, config)
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("application/json"))
        .unwrap_or(false)
}

/// `GET /`: rebuild the edge list and graph from the shared store and return
/// the page, or the vis JSON when the client asks for JSON.
#[debug_handler]
pub async fn handle_graph(
    state: Extension<Arc<ServerState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response> {
    // Without the forest worker nothing would ever complete the retrieval.
    let logged_span = if params.contains_key("debug") && logging_active() {
        Some(LoggedSpan::new_logged_span("graph"))
    } else {
        None
    };

    let graph = {
        let _log_entered = logged_span.as_ref().map(|lspan| lspan.span.enter());
        let edges = build_edges(&state.store);
        project_with(&edges, &state.config.graph)
    };

    let logs = match logged_span {
        Some(lspan) => lspan.retrieve_serde_json().await,
        _ => Value::Null,
    };

    let mut header_map = HeaderMap::new();
    header_map.insert(header::VARY, HeaderValue::from_static("Accept"));

    if wants_json(&headers) {
        return Ok((header_map, Json(graph.to_vis_json())).into_response());
    }

    let output = render_graph_page(&state.template, &graph, &state.config.render, logs)?;
    Ok((header_map, Html(output)).into_response())
}

pub fn make_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(handle_graph))
        .layer(Extension(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_format::tables::{
        default_type_styles, AzureRoleAssignment, RawTables, RoleDefinition, Subscription, User,
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn app() -> Router {
        let mut tables = RawTables::default();
        tables.users.push(User {
            user_id: "u1".to_string(),
            display_name: "Alice".to_string(),
            user_type: Some("User".to_string()),
            ..User::default()
        });
        tables.subscriptions.push(Subscription {
            subscription_id: "s1".to_string(),
            display_name: "Prod".to_string(),
            ..Subscription::default()
        });
        tables.role_definitions.push(RoleDefinition {
            role_definition_id: "r1".to_string(),
            role_name: "Reader".to_string(),
            ..RoleDefinition::default()
        });
        tables.role_assignments.push(AzureRoleAssignment {
            role_assignment_id: "ra1".to_string(),
            role_definition_id: "r1".to_string(),
            principal_id: "u1".to_string(),
            scope: "/subscriptions/s1".to_string(),
            ..AzureRoleAssignment::default()
        });
        tables.type_styles = default_type_styles();
        let state = ServerState::new(EntityStore::new(tables), Config::default()).unwrap();
        make_router(Arc::new(state))
    }

    async fn body_string(response: Response) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_graph_as_json() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("accept", "application/json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::VARY], "Accept");

        let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(json["edges"][0]["from"], "Alice");
        assert_eq!(json["edges"][0]["to"], "Prod");
        assert_eq!(json["edges"][0]["label"], "Reader");
        assert_eq!(json["nodes"][0]["color"], "cyan");
    }

    #[tokio::test]
    async fn test_graph_as_html() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_string(response).await;
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("\"Reader\""));
    }

    #[tokio::test]
    async fn test_debug_without_logging_still_renders() {
        let response = app()
            .oneshot(Request::builder().uri("/?debug").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_string(response).await;
        assert!(!html.contains("id=\"debug-log\""));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = app()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
