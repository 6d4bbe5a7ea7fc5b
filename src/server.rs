//! HTTP server — JSON-RPC tool endpoint at `/mcp`, health probe, manual
//! reflection trigger, and bearer-token auth on everything but health.

use anyhow::{bail, Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};

use crate::config::MnemoConfig;
use crate::conversations::ConversationIndexer;
use crate::daily;
use crate::index::IndexService;
use crate::llm::remote::RemoteChatModel;
use crate::notify::Notifier;
use crate::reflection::staging::ReflectionStaging;
use crate::reflection::ReflectionEngine;
use crate::reminders::ReminderScheduler;
use crate::rpc::{
    tool_content, RpcRequest, RpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
    UNAUTHORIZED,
};
use crate::sandbox::Sandbox;
use crate::store::fs::FsStore;
use crate::store::ObjectStore;
use crate::tools::{catalog::tool_catalog, DispatchError, ToolContext};

#[derive(Clone)]
pub struct AppState {
    pub tools: ToolContext,
    pub reflection: Option<Arc<ReflectionEngine>>,
    auth_token: Arc<String>,
}

/// Everything `serve` wires together; also reused by the CLI
/// subcommands that run one component directly.
pub struct App {
    pub state: AppState,
    pub store: Arc<dyn ObjectStore>,
    pub notifier: Arc<Notifier>,
}

impl App {
    pub fn build(config: &MnemoConfig) -> Result<Self> {
        if config.server.auth_token.is_empty() {
            bail!("auth token is required: set server.auth_token or MNEMO_AUTH_TOKEN");
        }

        let data_dir = config.resolved_data_dir();
        let store: Arc<dyn ObjectStore> = Arc::new(
            FsStore::open(data_dir.join("store"), config.storage.max_versions)
                .context("failed to open object store")?,
        );

        let embedder: Arc<dyn crate::embedding::EmbeddingProvider> =
            Arc::from(crate::embedding::create_provider(&config.embedding)?);
        let index = Arc::new(
            IndexService::open(data_dir.join("embeddings.db"), embedder)
                .context("failed to open index service")?,
        );

        let notifier = Arc::new(Notifier::new(&config.webhook));
        let staging = Arc::new(ReflectionStaging::new(store.clone()));

        let reflection = if !config.reflection.enabled {
            tracing::info!("agentic reflection disabled by config");
            None
        } else if config.llm.api_key.is_empty() {
            tracing::warn!("no LLM api key configured; reflection unavailable");
            None
        } else {
            let model = Arc::new(RemoteChatModel::new(&config.llm)?);
            Some(Arc::new(ReflectionEngine::new(
                store.clone(),
                index.clone(),
                model,
                notifier.clone(),
            )))
        };

        let tools = ToolContext {
            store: store.clone(),
            index: index.clone(),
            reminders: Arc::new(ReminderScheduler::new(store.clone())),
            conversations: Arc::new(ConversationIndexer::new(store.clone(), index)),
            sandbox: Arc::new(Sandbox::new(store.clone())),
            staging,
        };

        Ok(Self {
            state: AppState {
                tools,
                reflection,
                auth_token: Arc::new(config.server.auth_token.clone()),
            },
            store,
            notifier,
        })
    }
}

/// Start the HTTP server and the daily maintenance loop.
pub async fn serve(config: MnemoConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app = App::build(&config)?;

    tokio::spawn(daily::run_daily_loop(
        app.state.reflection.clone(),
        app.state.tools.reminders.clone(),
        app.store.clone(),
        app.notifier.clone(),
    ));

    let router = router(app.state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "mnemo listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let protected = Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/reflect", post(reflect_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn mcp_handler(State(state): State<AppState>, body: String) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(err) => {
            return Json(RpcResponse::failure(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {err}"),
            ))
        }
    };
    let id = request.id.clone();

    let response = match request.method.as_str() {
        "tools/list" => RpcResponse::success(id, json!({ "tools": tool_catalog() })),
        "tools/call" => {
            let name = request.params.get("name").and_then(Value::as_str);
            let Some(name) = name else {
                return Json(RpcResponse::failure(
                    id,
                    INVALID_PARAMS,
                    "params.name is required",
                ));
            };
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            match state.tools.dispatch(name, arguments).await {
                Ok(outcome) => {
                    RpcResponse::success(id, tool_content(&outcome.value, outcome.is_error))
                }
                Err(DispatchError::UnknownTool(name)) => {
                    RpcResponse::failure(id, INVALID_PARAMS, format!("unknown tool: {name}"))
                }
                Err(DispatchError::InvalidArguments(message)) => {
                    RpcResponse::failure(id, INVALID_PARAMS, format!("invalid arguments: {message}"))
                }
            }
        }
        other => RpcResponse::failure(
            id,
            METHOD_NOT_FOUND,
            format!("unknown method: {other}"),
        ),
    };
    Json(response)
}

async fn reflect_handler(State(state): State<AppState>) -> Response {
    let Some(engine) = state.reflection else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "reflection is not configured" })),
        )
            .into_response();
    };
    match engine.run().await {
        Ok(outcome) => Json(json!(outcome)).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

// ── Auth ─────────────────────────────────────────────────────────────────

async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match bearer_token(request.headers()) {
        Ok(token) if token_matches(token, &state.auth_token) => next.run(request).await,
        Ok(_) => unauthorized("invalid token"),
        Err(reason) => unauthorized(reason),
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, &'static str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or("missing authorization header")?;
    let text = value.to_str().map_err(|_| "malformed authorization header")?;
    text.strip_prefix("Bearer ")
        .ok_or("malformed authorization header")
}

fn token_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn unauthorized(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "jsonrpc": "2.0",
            "error": { "code": UNAUTHORIZED, "message": reason }
        })),
    )
        .into_response()
}
