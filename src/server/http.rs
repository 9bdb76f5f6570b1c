//! HTTP server for docguard
//!
//! Document routes and the audit intake sit behind the access gate.
//! `/health` is public and the storage origin is gated by URL signature
//! alone.

use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::delivery::{
    Combination, DeliveryError, DeliveryService, DeliveryType, FsObjectStore, NewObject,
    ResourceType, StoreError,
};
use crate::gate::{AccessGate, AuthenticatedUser, require_identity};
use crate::monitor::{AuditSubmission, EventSink, TracingSink};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct Server {
    config: Config,
}

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub gate: AccessGate,
    pub delivery: DeliveryService,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(FsObjectStore::new(config.storage_root()));
        Ok(Self {
            gate: AccessGate::from_config(config).context("Failed to set up access gate")?,
            delivery: DeliveryService::from_config(config, store)
                .context("Failed to set up delivery")?,
            max_upload_bytes: config.server.max_upload_bytes,
        })
    }
}

impl Server {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
        })
    }

    pub async fn run(&self) -> Result<()> {
        let state = AppState::from_config(&self.config)?;
        let app = router(state);

        let addr: SocketAddr =
            format!("{}:{}", self.config.server.bind, self.config.server.port).parse()?;

        info!("Starting HTTP server on http://{}", addr);
        info!("Storage origin at {}", self.config.origin_base());

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped");
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));

    let gated = Router::new()
        .route("/documents/upload", post(upload_document))
        .route("/documents/sign-url", post(sign_url))
        .route("/documents/metadata/{id}", get(document_metadata))
        .route("/documents/proxy/{id}", get(proxy_document))
        .route("/documents/{id}", get(list_documents).delete(delete_document))
        .route("/security/events", post(security_event))
        .route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            require_identity,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/storage/{resource_type}/{delivery_type}/{id}",
            get(serve_object),
        )
        .merge(gated)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// Error response type
struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "message": self.1 }))).into_response()
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn upload_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    mut multipart: Multipart,
) -> Response {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut group_id = None;
    let mut resource_type = ResourceType::Auto;
    let mut delivery_type = DeliveryType::Authenticated;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return AppError(e.status(), e.body_text()).into_response(),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                match field.bytes().await {
                    Ok(bytes) => file = Some((file_name, content_type, bytes.to_vec())),
                    Err(e) => return AppError(e.status(), e.body_text()).into_response(),
                }
            }
            "groupId" | "resourceType" | "deliveryType" => {
                let value = match field.text().await {
                    Ok(value) => value,
                    Err(e) => return AppError(e.status(), e.body_text()).into_response(),
                };
                let parsed = match name.as_str() {
                    "groupId" => {
                        group_id = Some(value).filter(|v| !v.trim().is_empty());
                        Ok(())
                    }
                    "resourceType" => value.parse().map(|v| resource_type = v),
                    _ => value.parse().map(|v| delivery_type = v),
                };
                if let Err(e) = parsed {
                    return AppError(StatusCode::BAD_REQUEST, e).into_response();
                }
            }
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    let Some((file_name, content_type, bytes)) = file else {
        return AppError(StatusCode::BAD_REQUEST, "Missing 'file' field".to_string())
            .into_response();
    };
    let Some(group_id) = group_id else {
        return AppError(StatusCode::BAD_REQUEST, "Missing 'groupId' field".to_string())
            .into_response();
    };

    let content_type = content_type
        .filter(|ct| !ct.is_empty() && ct != DEFAULT_CONTENT_TYPE)
        .or_else(|| {
            mime_guess::from_path(&file_name)
                .first()
                .map(|m| m.essence_str().to_string())
        })
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let object = NewObject {
        group_id,
        file_name,
        content_type,
        resource_type,
        delivery_type,
        uploaded_by: Some(user.uid().to_string()),
    };
    match state.delivery.store().put(object, bytes).await {
        Ok(stored) => {
            info!(
                id = %stored.id,
                group = %stored.group_id,
                uid = %user.uid(),
                combination = %stored.combination(),
                "Document uploaded"
            );
            (StatusCode::CREATED, Json(stored)).into_response()
        }
        Err(e) => DeliveryError::from(e).into_response(),
    }
}

async fn list_documents(State(state): State<AppState>, Path(group_id): Path<String>) -> Response {
    match state.delivery.store().list(&group_id).await {
        Ok(objects) => Json(objects).into_response(),
        Err(e) => DeliveryError::from(e).into_response(),
    }
}

async fn document_metadata(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.delivery.store().metadata(&id).await {
        Ok(object) => Json(object).into_response(),
        Err(e) => DeliveryError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUrlRequest {
    resource_id: String,
    #[serde(default)]
    resource_type: Option<ResourceType>,
    #[serde(default)]
    delivery_type: Option<DeliveryType>,
}

async fn sign_url(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SignUrlRequest>,
) -> Response {
    match state
        .delivery
        .sign_url(
            &request.resource_id,
            request.resource_type,
            request.delivery_type,
        )
        .await
    {
        Ok(signed) => {
            debug!(id = %request.resource_id, uid = %user.uid(), "Issued signed URL");
            Json(signed).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn delete_document(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.delivery.delete(&id).await {
        Ok(()) => Json(json!({ "deleted": true, "id": id })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn proxy_document(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let upstream = match state.delivery.proxy(&id).await {
        Ok(resp) => resp,
        Err(e) => return e.into_response(),
    };

    let mut builder = Response::builder()
        .status(upstream.status().as_u16())
        .header(header::CACHE_CONTROL, "private, no-store");
    if let Some(content_type) = upstream.headers().get(reqwest::header::CONTENT_TYPE)
        && let Ok(content_type) = content_type.to_str()
    {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|e| {
            AppError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        })
}

async fn security_event(
    Extension(user): Extension<AuthenticatedUser>,
    Json(submission): Json<AuditSubmission>,
) -> Response {
    {
        let _span = tracing::info_span!("audit", uid = %user.uid()).entered();
        TracingSink {
            correlation_id: submission.correlation_id.clone(),
        }
        .submit(&submission.event);
    }
    (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response()
}

#[derive(Debug, Deserialize)]
struct OriginQuery {
    expires: Option<i64>,
    signature: Option<String>,
}

/// Storage origin. The signature is the only credential; the object is
/// served only under the combination it was stored with. `HEAD` reads the
/// descriptor only.
async fn serve_object(
    State(state): State<AppState>,
    method: Method,
    Path((resource_type, delivery_type, id)): Path<(String, String, String)>,
    Query(query): Query<OriginQuery>,
) -> Response {
    let not_found = || AppError(StatusCode::NOT_FOUND, "Not found".to_string()).into_response();

    let (Ok(resource_type), Ok(delivery_type)) = (
        resource_type.parse::<ResourceType>(),
        delivery_type.parse::<DeliveryType>(),
    ) else {
        return not_found();
    };
    let requested = Combination::new(resource_type, delivery_type);

    let (Some(expires), Some(signature)) = (query.expires, query.signature) else {
        return AppError(StatusCode::UNAUTHORIZED, "Unauthorized".to_string()).into_response();
    };
    if let Err(e) = state
        .delivery
        .signer()
        .verify(&id, requested, expires, &signature)
    {
        warn!(id = %id, combination = %requested, "Origin refused URL: {}", e);
        return AppError(StatusCode::UNAUTHORIZED, "Unauthorized".to_string()).into_response();
    }

    let store = state.delivery.store();
    let found = if method == Method::HEAD {
        store.metadata(&id).await.map(|object| (object, None))
    } else {
        store.read(&id).await.map(|(object, bytes)| (object, Some(bytes)))
    };
    let (object, bytes) = match found {
        Ok(found) => found,
        Err(StoreError::NotFound(_)) | Err(StoreError::InvalidId(_)) => return not_found(),
        Err(e) => return DeliveryError::from(e).into_response(),
    };
    if object.combination() != requested {
        debug!(id = %id, stored = %object.combination(), requested = %requested, "Combination mismatch");
        return not_found();
    }

    let headers = [
        (header::CONTENT_TYPE, object.content_type),
        (header::CACHE_CONTROL, "private, no-store".to_string()),
    ];
    match bytes {
        Some(bytes) => (headers, bytes).into_response(),
        None => (
            headers,
            [(header::CONTENT_LENGTH, object.size.to_string())],
        )
            .into_response(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
