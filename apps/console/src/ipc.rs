use crate::destinations::{
    self, approve, describe, from_target_url, to_target_url, validate, Approved, BackendModule,
    DestinationFields, DestinationSchema, DestinationType, FieldIssue, TestOutcome,
};
use crate::errors::ConsoleError;
use crate::filters::{
    evaluate, expand, toggle, FileTree, FileTreeNode, FilterGroupCatalog, SelectionMode,
};
use crate::state::SharedState;
use crate::status::StatusSnapshot;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn reject(err: ConsoleError) -> (StatusCode, String) {
    let status = match &err {
        ConsoleError::InvalidField { .. } | ConsoleError::UnknownDestination(_) => StatusCode::BAD_REQUEST,
        ConsoleError::Http { .. } | ConsoleError::Transport(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/v1/status", get(get_status))
        .route("/v1/destinations", get(list_destinations))
        .route("/v1/destinations/describe", post(describe_destination))
        .route("/v1/destinations/encode", post(encode_destination))
        .route("/v1/destinations/decode", post(decode_destination))
        .route("/v1/destinations/validate", post(validate_destination))
        .route("/v1/destinations/test", post(test_destination))
        .route("/v1/destinations/approve", post(approve_destination))
        .route("/v1/filters/evaluate", post(evaluate_filters))
        .route("/v1/filters/toggle", post(toggle_filter))
        .route("/v1/filters/expand", post(expand_filters))
        .with_state(state)
        .layer(cors)
}

pub async fn serve(state: SharedState) -> anyhow::Result<()> {
    let addr = state.read().await.config.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    debug!("ipc: listening addr={}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn get_status(State(state): State<SharedState>) -> Json<StatusSnapshot> {
    let status = Arc::clone(&state.read().await.status);
    let snapshot = status.read().await.snapshot();
    Json(snapshot)
}

#[derive(Debug, Serialize)]
struct DestinationSummary {
    id: String,
    key: String,
    display_name: String,
    description: String,
}

async fn list_destinations() -> Json<Vec<DestinationSummary>> {
    let list = destinations::catalog()
        .iter()
        .map(|entry| DestinationSummary {
            id: entry.id().to_string(),
            key: entry.key.clone(),
            display_name: entry.display_name.clone(),
            description: entry.description.clone(),
        })
        .collect();
    Json(list)
}

/// Backend option lists, cached after the first successful fetch. A failed
/// fetch is not fatal: the static declarations still describe the form.
async fn backend_modules(state: &SharedState) -> Option<Arc<Vec<BackendModule>>> {
    let client = {
        let guard = state.read().await;
        if let Some(modules) = &guard.backend_modules {
            return Some(Arc::clone(modules));
        }
        guard.client.clone()
    };
    match client.backend_modules().await {
        Ok(modules) => {
            let modules = Arc::new(modules);
            state.write().await.backend_modules = Some(Arc::clone(&modules));
            Some(modules)
        }
        Err(err) => {
            warn!("ipc: backend list unavailable err={}", err);
            None
        }
    }
}

async fn filter_groups(state: &SharedState) -> Arc<FilterGroupCatalog> {
    let client = {
        let guard = state.read().await;
        if let Some(groups) = &guard.filter_groups {
            return Arc::clone(groups);
        }
        guard.client.clone()
    };
    match client.filter_groups().await {
        Ok(groups) => {
            let groups = Arc::new(groups);
            state.write().await.filter_groups = Some(Arc::clone(&groups));
            groups
        }
        Err(err) => {
            warn!("ipc: filter groups unavailable err={}", err);
            Arc::new(FilterGroupCatalog::default())
        }
    }
}

fn lookup_type(id: &str) -> DestinationType {
    destinations::catalog::find(id)
        .cloned()
        .unwrap_or_else(|| DestinationType::fallback(id))
}

async fn schema_for(state: &SharedState, id: &str) -> DestinationSchema {
    let entry = lookup_type(id);
    let modules = backend_modules(state).await;
    let module = modules
        .as_ref()
        .and_then(|modules| modules.iter().find(|module| module.key == entry.key));
    describe(&entry, module)
}

#[derive(Debug, Deserialize)]
struct DescribeRequest {
    destination_type: String,
}

async fn describe_destination(
    State(state): State<SharedState>,
    Json(req): Json<DescribeRequest>,
) -> Json<DestinationSchema> {
    debug!("describe: request type={}", req.destination_type);
    Json(schema_for(&state, &req.destination_type).await)
}

#[derive(Debug, Serialize)]
struct EncodeResponse {
    url: String,
}

async fn encode_destination(Json(fields): Json<DestinationFields>) -> ApiResult<EncodeResponse> {
    debug!("encode: request type={}", fields.destination_type);
    let url = to_target_url(&fields).map_err(reject)?;
    Ok(Json(EncodeResponse { url }))
}

#[derive(Debug, Deserialize)]
struct DecodeRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct DecodeResponse {
    /// `None` when the URL could not be read; the form stays blank.
    fields: Option<DestinationFields>,
}

async fn decode_destination(Json(req): Json<DecodeRequest>) -> Json<DecodeResponse> {
    let fields = from_target_url(&req.url);
    debug!("decode: request parsed={}", fields.is_some());
    Json(DecodeResponse { fields })
}

async fn validate_destination(
    State(state): State<SharedState>,
    Json(fields): Json<DestinationFields>,
) -> Json<Vec<FieldIssue>> {
    let schema = schema_for(&state, &fields.destination_type).await;
    let issues = validate(&schema, &fields);
    debug!("validate: type={} issues={}", fields.destination_type, issues.len());
    Json(issues)
}

async fn test_destination(
    State(state): State<SharedState>,
    Json(fields): Json<DestinationFields>,
) -> ApiResult<TestOutcome> {
    let url = to_target_url(&fields).map_err(reject)?;
    let client = state.read().await.client.clone();
    let outcome = client.test_destination(&url).await.map_err(|err| {
        warn!("test: request failed type={} err={}", fields.destination_type, err);
        reject(err)
    })?;
    debug!(
        "test: type={} outcome={:?} approvable={}",
        fields.destination_type,
        outcome,
        outcome.is_approvable()
    );
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    fields: DestinationFields,
    outcome: TestOutcome,
}

async fn approve_destination(Json(req): Json<ApproveRequest>) -> ApiResult<Option<Approved>> {
    debug!("approve: request type={}", req.fields.destination_type);
    let approved = approve(&req.fields, &req.outcome).map_err(reject)?;
    Ok(Json(approved))
}

/// Where the nodes to evaluate come from.
#[derive(Debug, Default, Deserialize)]
struct NodeSource {
    #[serde(default)]
    nodes: Vec<FileTreeNode>,
    /// List this local folder and add its entries.
    #[serde(default)]
    list_path: Option<String>,
    /// List this folder of a backup version and add its entries.
    #[serde(default)]
    backup: Option<BackupListing>,
}

#[derive(Debug, Deserialize)]
struct BackupListing {
    backup_id: String,
    time: String,
    prefix: String,
}

async fn collect_nodes(state: &SharedState, source: NodeSource) -> Result<Vec<FileTreeNode>, (StatusCode, String)> {
    let mut nodes = source.nodes;
    if source.list_path.is_none() && source.backup.is_none() {
        return Ok(nodes);
    }
    let client = state.read().await.client.clone();
    if let Some(path) = &source.list_path {
        nodes.extend(client.list_path(path).await.map_err(reject)?);
    }
    if let Some(listing) = &source.backup {
        let listed = client
            .list_backup_path(&listing.backup_id, &listing.time, &listing.prefix)
            .await
            .map_err(reject)?;
        nodes.extend(listed);
    }
    Ok(nodes)
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    #[serde(flatten)]
    source: NodeSource,
    rules: Vec<String>,
    #[serde(default)]
    root_path: Option<String>,
    #[serde(default)]
    accept_filter: Option<String>,
}

async fn evaluate_filters(
    State(state): State<SharedState>,
    Json(req): Json<EvaluateRequest>,
) -> ApiResult<FileTree> {
    let nodes = collect_nodes(&state, req.source).await?;
    let groups = filter_groups(&state).await;
    let tree = evaluate(
        &nodes,
        &req.rules,
        &groups,
        req.root_path.as_deref(),
        req.accept_filter.as_deref(),
    );
    debug!("evaluate: nodes={} rules={} tree={}", nodes.len(), req.rules.len(), tree.len());
    Ok(Json(tree))
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    #[serde(flatten)]
    source: NodeSource,
    rules: Vec<String>,
    node_id: String,
    mode: SelectionMode,
}

#[derive(Debug, Serialize)]
struct RulesResponse {
    rules: Vec<String>,
}

async fn toggle_filter(
    State(state): State<SharedState>,
    Json(req): Json<ToggleRequest>,
) -> ApiResult<RulesResponse> {
    let nodes = collect_nodes(&state, req.source).await?;
    let groups = filter_groups(&state).await;
    let tree = evaluate(&nodes, &req.rules, &groups, None, None);
    let rules = toggle(&req.rules, &groups, &tree, &req.node_id, req.mode);
    debug!("toggle: mode={:?} before={} after={}", req.mode, req.rules.len(), rules.len());
    Ok(Json(RulesResponse { rules }))
}

#[derive(Debug, Deserialize)]
struct ExpandRequest {
    rules: Vec<String>,
}

async fn expand_filters(
    State(state): State<SharedState>,
    Json(req): Json<ExpandRequest>,
) -> Json<RulesResponse> {
    let groups = filter_groups(&state).await;
    Json(RulesResponse {
        rules: expand(&req.rules, &groups),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ServerClient, StaticToken};
    use crate::config::ConsoleConfig;
    use crate::state::ConsoleRuntimeState;
    use crate::status::StatusModel;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    /// State whose server is unreachable but whose catalogs are preloaded.
    fn offline_state() -> SharedState {
        let config = ConsoleConfig {
            server_url: "http://127.0.0.1:9".to_string(),
            ..ConsoleConfig::default()
        };
        let client = ServerClient::new(&config, Arc::new(StaticToken::new(None))).unwrap();
        let mut runtime = ConsoleRuntimeState::new(config, client, StatusModel::shared(3));
        runtime.backend_modules = Some(Arc::new(Vec::new()));
        runtime.filter_groups = Some(Arc::new(FilterGroupCatalog::new(HashMap::from([(
            "Temp".to_string(),
            vec!["*.tmp".to_string()],
        )]))));
        Arc::new(RwLock::new(runtime))
    }

    async fn call(app: Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let response = reqwest::Client::new()
            .post(format!("http://{}{}", addr, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        let text = response.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }

    #[tokio::test]
    async fn encode_and_decode_round_trip() {
        let app = router(offline_state());
        let (status, body) = call(
            app.clone(),
            "/v1/destinations/encode",
            serde_json::json!({
                "destinationType": "s3",
                "custom": { "bucket": "mybucket", "path": "/backups" },
                "dynamic": { "auth-username": "u" }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "s3://mybucket/backups?auth-username=u");

        let (_, decoded) = call(
            app,
            "/v1/destinations/decode",
            serde_json::json!({ "url": "ftp://1.2.3/x" }),
        )
        .await;
        assert!(decoded["fields"].is_null());
    }

    #[tokio::test]
    async fn invalid_fields_are_bad_requests() {
        let (status, body) = call(
            router(offline_state()),
            "/v1/destinations/encode",
            serde_json::json!({ "destinationType": "ssh", "custom": {} }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.as_str().unwrap_or_default().contains("server"));
    }

    #[tokio::test]
    async fn evaluate_uses_cached_filter_groups() {
        let (status, body) = call(
            router(offline_state()),
            "/v1/filters/evaluate",
            serde_json::json!({
                "nodes": [
                    { "id": "/data/", "cls": "folder" },
                    { "id": "/data/cache.tmp", "cls": "file" }
                ],
                "rules": ["/data/", "{Temp}"]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let slash = &body["root"]["children"][0];
        assert_eq!(slash["id"], "/");
        let data = &slash["children"][0];
        assert_eq!(data["id"], "/data/");
        assert_eq!(data["state"], "Included");
        assert_eq!(data["children"][0]["state"], "Excluded");
    }

    #[tokio::test]
    async fn toggle_and_expand() {
        let app = router(offline_state());
        let (_, toggled) = call(
            app.clone(),
            "/v1/filters/toggle",
            serde_json::json!({
                "nodes": [{ "id": "/srv/", "cls": "folder" }],
                "rules": [],
                "node_id": "/srv/",
                "mode": "multi"
            }),
        )
        .await;
        assert_eq!(toggled["rules"], serde_json::json!(["/srv/"]));

        let (_, expanded) = call(app, "/v1/filters/expand", serde_json::json!({ "rules": ["{temp}", "/a/"] })).await;
        assert_eq!(expanded["rules"], serde_json::json!(["-*.tmp", "/a/"]));
    }

    #[tokio::test]
    async fn describe_falls_back_to_static_fields() {
        let (status, body) = call(
            router(offline_state()),
            "/v1/destinations/describe",
            serde_json::json!({ "destination_type": "webdav" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["custom"][0]["name"], "server");
        assert_eq!(body["dynamic"][0]["name"], "use-ssl");
    }
}
