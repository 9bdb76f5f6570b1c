use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::config::AuthConfig;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("identity rejected: {0}")]
    Rejected(String),
}

/// Claims read from an identity token. Unknown claims are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub iss: Option<String>,
}

/// Identity attached to a request once the gate has let it through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: Option<String>,
    pub expires_at: i64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError>;
}

/// Verifies signed JWTs locally (HS256 shared secret or RS256 public key).
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(key: DecodingKey, algorithm: Algorithm, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(algorithm);
        match issuer {
            Some(iss) => {
                validation.set_issuer(&[iss]);
                validation.set_required_spec_claims(&["exp", "sub", "iss"]);
            }
            None => validation.set_required_spec_claims(&["exp", "sub"]),
        }
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        Self { key, validation }
    }

    pub fn from_config(auth: &AuthConfig) -> Result<Self> {
        let (key, algorithm) = match auth.algorithm.to_ascii_uppercase().as_str() {
            "HS256" => {
                if auth.secret.is_empty() {
                    anyhow::bail!("auth.secret must be set for HS256");
                }
                (DecodingKey::from_secret(auth.secret.as_bytes()), Algorithm::HS256)
            }
            "RS256" => {
                let path = auth
                    .public_key_file
                    .as_deref()
                    .context("auth.public_key_file must be set for RS256")?;
                let path = shellexpand::tilde(path).into_owned();
                let pem = fs::read(&path)
                    .with_context(|| format!("Failed to read public key {}", path))?;
                (
                    DecodingKey::from_rsa_pem(&pem).context("Invalid RSA public key")?,
                    Algorithm::RS256,
                )
            }
            other => anyhow::bail!("Unsupported auth.algorithm '{}'", other),
        };

        Ok(Self::new(
            key,
            algorithm,
            auth.issuer.as_deref(),
            auth.audience.as_deref(),
        ))
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        if data.claims.sub.is_empty() {
            return Err(IdentityError::Rejected("empty subject".to_string()));
        }
        Ok(VerifiedIdentity {
            uid: data.claims.sub,
            email: data.claims.email,
            expires_at: data.claims.exp,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    pub const SECRET: &str = "test-secret-of-reasonable-length";

    pub fn mint(sub: &str, exp_offset: i64, secret: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        encode(
            &Header::default(),
            &json!({"sub": sub, "email": format!("{sub}@example.com"), "iat": now, "exp": now + exp_offset, "iss": "issuer.example.com", "aud": "docguard"}),
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }
}
