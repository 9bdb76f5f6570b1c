use anyhow::{Context, Result};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::kinds::{Combination, DeliveryType, ResourceType};
use super::signing::{SignatureError, SignedUrl, UrlSigner, load_signing_key};
use super::store::{ObjectStore, StoreError};
use super::table::CompatibilityTable;
use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("no delivery combination works for '{0}'")]
    NoCompatibleCombination(String),
    #[error("upstream delivery failed (status {status:?})")]
    Upstream { status: Option<u16> },
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DeliveryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoCompatibleCombination(_) => StatusCode::NOT_FOUND,
            Self::Upstream { status } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::InvalidId(_)) => StatusCode::BAD_REQUEST,
            Self::Store(_) | Self::Signature(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Origin answers that only mean "not under this combination".
fn is_wrong_combination(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::UNAUTHORIZED
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Delivery failed: {}", self);
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

/// Signed-URL issuance, combination resolution and proxying for stored
/// resources. Cheap to clone; clones share the compatibility table.
#[derive(Clone)]
pub struct DeliveryService {
    store: Arc<dyn ObjectStore>,
    signer: UrlSigner,
    table: CompatibilityTable,
    client: reqwest::Client,
}

impl DeliveryService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        signer: UrlSigner,
        upstream_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(upstream_timeout)
            .build()
            .context("Failed to build upstream HTTP client")?;
        Ok(Self {
            store,
            signer,
            table: CompatibilityTable::default(),
            client,
        })
    }

    pub fn from_config(config: &Config, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let key = load_signing_key(
            config.delivery.signing_key.as_deref(),
            &config.paths.data_dir,
        )?;
        let signer = UrlSigner::new(key, config.origin_base(), config.delivery.url_ttl_secs);
        Self::new(
            store,
            signer,
            Duration::from_secs(config.delivery.upstream_timeout_secs),
        )
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    pub fn table(&self) -> &CompatibilityTable {
        &self.table
    }

    /// Sign a URL for `id`. A fully specified combination is signed as is;
    /// otherwise the missing parts are resolved through the table or a probe.
    pub async fn sign_url(
        &self,
        id: &str,
        resource_type: Option<ResourceType>,
        delivery_type: Option<DeliveryType>,
    ) -> Result<SignedUrl, DeliveryError> {
        let combination = match (resource_type, delivery_type) {
            (Some(rt), Some(dt)) => Combination::new(rt, dt),
            (rt, dt) => self.resolve(id, rt, dt).await?,
        };
        Ok(self.signer.sign(id, combination)?)
    }

    /// Combination that works for `id` within the given constraints.
    ///
    /// A recorded entry is reused when it satisfies the constraints.
    /// Otherwise candidates are probed in [`Combination::ALL`] order and the
    /// first success is recorded.
    pub async fn resolve(
        &self,
        id: &str,
        resource_type: Option<ResourceType>,
        delivery_type: Option<DeliveryType>,
    ) -> Result<Combination, DeliveryError> {
        let accepts = |c: &Combination| {
            resource_type.is_none_or(|rt| rt == c.resource_type)
                && delivery_type.is_none_or(|dt| dt == c.delivery_type)
        };

        if let Some(known) = self.table.get(id).await
            && accepts(&known)
        {
            debug!(id, combination = %known, "Using recorded combination");
            return Ok(known);
        }

        // Set when some candidate failed for a reason other than "not this
        // combination"; holds the upstream status if there was one.
        let mut failure: Option<Option<u16>> = None;

        for candidate in Combination::ALL.into_iter().filter(accepts) {
            let signed = self.signer.sign(id, candidate)?;
            match self.client.head(&signed.url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(id, combination = %candidate, "Recorded working combination");
                    self.table.record(id, candidate).await;
                    return Ok(candidate);
                }
                Ok(resp) if is_wrong_combination(resp.status()) => {
                    debug!(id, combination = %candidate, status = %resp.status(), "Candidate rejected")
                }
                Ok(resp) => {
                    warn!(id, combination = %candidate, status = %resp.status(), "Candidate failed upstream");
                    failure = Some(Some(resp.status().as_u16()));
                }
                Err(e) => {
                    warn!(id, combination = %candidate, "Candidate check failed: {}", e);
                    if failure.is_none() {
                        failure = Some(e.status().map(|s| s.as_u16()));
                    }
                }
            }
        }

        match failure {
            Some(status) => Err(DeliveryError::Upstream { status }),
            None => Err(DeliveryError::NoCompatibleCombination(id.to_string())),
        }
    }

    /// Fetch `id` through a freshly signed URL. One attempt only.
    pub async fn proxy(&self, id: &str) -> Result<reqwest::Response, DeliveryError> {
        let combination = self.resolve(id, None, None).await?;
        let signed = self.signer.sign(id, combination)?;

        let resp = self.client.get(&signed.url).send().await.map_err(|e| {
            warn!(id, "Upstream fetch failed: {}", e);
            DeliveryError::Upstream {
                status: e.status().map(|s| s.as_u16()),
            }
        })?;

        if !resp.status().is_success() {
            warn!(id, status = %resp.status(), "Upstream rejected delivery");
            return Err(DeliveryError::Upstream {
                status: Some(resp.status().as_u16()),
            });
        }
        Ok(resp)
    }

    /// Delete the stored object and forget its recorded combination.
    pub async fn delete(&self, id: &str) -> Result<(), DeliveryError> {
        self.store.delete(id).await?;
        self.table.forget(id).await;
        info!(id, "Deleted resource");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::store::{FsObjectStore, NewObject};
    use mockito::Matcher;

    const RAW_AUTH: Combination = Combination::new(ResourceType::Raw, DeliveryType::Authenticated);

    fn service(origin: String, root: &std::path::Path) -> DeliveryService {
        DeliveryService::new(
            Arc::new(FsObjectStore::new(root)),
            UrlSigner::new(vec![3u8; 32], origin, 60),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn path(combination: &str, id: &str) -> Matcher {
        Matcher::Regex(format!("^/storage/{}/{}", combination, id))
    }

    #[tokio::test]
    async fn resolution_records_first_working_combination() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("HEAD", path("image/authenticated", "doc1"))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(format!("{}/storage", server.url()), tmp.path());

        let found = svc.resolve("doc1", None, None).await.unwrap();
        assert_eq!(
            found,
            Combination::new(ResourceType::Image, DeliveryType::Authenticated)
        );
        assert_eq!(svc.table().get("doc1").await, Some(found));

        // Second call is served from the table.
        assert_eq!(svc.resolve("doc1", None, None).await.unwrap(), found);
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn resolution_respects_partial_constraints() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", Matcher::Regex("^/storage/".to_string()))
            .with_status(200)
            .create_async()
            .await;
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(format!("{}/storage", server.url()), tmp.path());

        let found = svc
            .resolve("doc2", None, Some(DeliveryType::Authenticated))
            .await
            .unwrap();
        assert_eq!(found.delivery_type, DeliveryType::Authenticated);
        assert_eq!(found.resource_type, ResourceType::Image);
    }

    #[tokio::test]
    async fn no_working_combination_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", Matcher::Regex("^/storage/".to_string()))
            .with_status(404)
            .create_async()
            .await;
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(format!("{}/storage", server.url()), tmp.path());

        let err = svc.resolve("ghost", None, None).await.unwrap_err();
        assert!(matches!(err, DeliveryError::NoCompatibleCombination(_)));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(svc.table().is_empty().await);
    }

    #[tokio::test]
    async fn explicit_combination_skips_probing() {
        let server = mockito::Server::new_async().await;
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(format!("{}/storage", server.url()), tmp.path());

        let signed = svc
            .sign_url("doc3", Some(ResourceType::Raw), Some(DeliveryType::Upload))
            .await
            .unwrap();
        assert!(signed.url.contains("/storage/raw/upload/doc3?expires="));
        assert!(svc.table().is_empty().await);
    }

    #[tokio::test]
    async fn proxy_streams_upstream_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", path("raw/authenticated", "doc4"))
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.7")
            .create_async()
            .await;
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(format!("{}/storage", server.url()), tmp.path());
        svc.table().record("doc4", RAW_AUTH).await;

        let resp = svc.proxy("doc4").await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "application/pdf"
        );
        assert_eq!(resp.text().await.unwrap(), "%PDF-1.7");
    }

    #[tokio::test]
    async fn proxy_failure_carries_upstream_status_and_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let denied = server
            .mock("GET", path("raw/authenticated", "doc5"))
            .with_status(403)
            .expect(1)
            .create_async()
            .await;
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(format!("{}/storage", server.url()), tmp.path());
        svc.table().record("doc5", RAW_AUTH).await;

        let err = svc.proxy("doc5").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Upstream { status: Some(403) }));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        denied.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_upstream_maps_to_bad_gateway() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service("http://127.0.0.1:1/storage".to_string(), tmp.path());
        svc.table().record("doc6", RAW_AUTH).await;

        let err = svc.proxy("doc6").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Upstream { status: None }));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unreachable_origin_during_resolution_is_bad_gateway() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service("http://127.0.0.1:1/storage".to_string(), tmp.path());

        let err = svc.proxy("doc-unseen").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Upstream { status: None }));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(svc.table().is_empty().await);
    }

    #[tokio::test]
    async fn origin_outage_during_resolution_keeps_upstream_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", Matcher::Regex("^/storage/".to_string()))
            .with_status(503)
            .create_async()
            .await;
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(format!("{}/storage", server.url()), tmp.path());

        let err = svc.proxy("doc7").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Upstream { status: Some(503) }));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err = svc.sign_url("doc7", None, None).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn delete_forgets_recorded_combination() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service("http://127.0.0.1:1/storage".to_string(), tmp.path());
        let object = svc
            .store()
            .put(
                NewObject {
                    group_id: "g".to_string(),
                    file_name: "a.txt".to_string(),
                    content_type: "text/plain".to_string(),
                    resource_type: ResourceType::Auto,
                    delivery_type: DeliveryType::Upload,
                    uploaded_by: None,
                },
                b"hi".to_vec(),
            )
            .await
            .unwrap();
        svc.table().record(&object.id, object.combination()).await;

        svc.delete(&object.id).await.unwrap();
        assert_eq!(svc.table().get(&object.id).await, None);
        assert!(matches!(
            svc.delete(&object.id).await,
            Err(DeliveryError::Store(StoreError::NotFound(_)))
        ));
    }
}
