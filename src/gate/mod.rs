//! Access gate: bearer identity plus account status, checked per request.
//!
//! 1. No or malformed `Authorization: Bearer` header: `Unauthorized`.
//! 2. Token rejected by the identity verifier: `Unauthorized`.
//! 3. User record says `disabled`: `Forbidden` with the record's reason.
//! 4. Otherwise the verified identity is attached to the request.
//!
//! A missing user record is not an error. Failures never reveal their
//! cause to the caller; it goes to the log instead.

mod identity;
mod users;

pub use identity::{Claims, IdentityError, IdentityVerifier, JwtVerifier, VerifiedIdentity};
pub use users::{InMemoryUserStore, JsonFileUserStore, UserRecord, UserStore, UserStoreError};

#[cfg(test)]
pub(crate) use identity::test_tokens;

use anyhow::Result;
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;

pub const DEFAULT_DISABLED_REASON: &str = "Terms verification pending";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GateError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Account disabled: {reason}")]
    Forbidden { reason: String },
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        match self {
            GateError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "Unauthorized" })),
            )
                .into_response(),
            GateError::Forbidden { reason } => (
                StatusCode::FORBIDDEN,
                Json(json!({ "message": "Account disabled", "reason": reason })),
            )
                .into_response(),
        }
    }
}

/// The caller a gated handler runs on behalf of.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub identity: VerifiedIdentity,
    pub record: Option<UserRecord>,
}

impl AuthenticatedUser {
    pub fn uid(&self) -> &str {
        &self.identity.uid
    }
}

#[derive(Clone)]
pub struct AccessGate {
    verifier: Arc<dyn IdentityVerifier>,
    users: Arc<dyn UserStore>,
}

impl AccessGate {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, users: Arc<dyn UserStore>) -> Self {
        Self { verifier, users }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let verifier = JwtVerifier::from_config(&config.auth)?;
        let users: Arc<dyn UserStore> = match config.auth.users_file {
            Some(ref file) => Arc::new(JsonFileUserStore::new(
                shellexpand::tilde(file).into_owned(),
            )),
            None => Arc::new(InMemoryUserStore::default()),
        };
        Ok(Self::new(Arc::new(verifier), users))
    }

    pub async fn check(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, GateError> {
        let token = extract_bearer(headers).ok_or_else(|| {
            debug!("Request without bearer credential");
            GateError::Unauthorized
        })?;

        let identity = self.verifier.verify(token).await.map_err(|e| {
            warn!("Rejected identity token: {}", e);
            GateError::Unauthorized
        })?;

        let record = self.users.get(&identity.uid).await.map_err(|e| {
            warn!(uid = %identity.uid, "User lookup failed: {}", e);
            GateError::Unauthorized
        })?;

        if let Some(ref record) = record
            && record.disabled
        {
            let reason = record
                .disabled_reason
                .clone()
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| DEFAULT_DISABLED_REASON.to_string());
            warn!(uid = %identity.uid, reason = %reason, "Disabled account refused");
            return Err(GateError::Forbidden { reason });
        }

        debug!(uid = %identity.uid, "Identity verified");
        Ok(AuthenticatedUser { identity, record })
    }
}

/// Token from `Authorization: Bearer <token>`; the scheme is case-insensitive.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Middleware for gated routes. On success the [`AuthenticatedUser`] is
/// available to handlers as an `Extension`.
pub async fn require_identity(
    State(gate): State<AccessGate>,
    mut req: Request,
    next: Next,
) -> Response {
    match gate.check(req.headers()).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}
