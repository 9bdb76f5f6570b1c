//! Time-limited signed URLs for the storage origin.
//!
//! A signed URL names one exact combination:
//!
//! ```text
//! {origin}/{resource_type}/{delivery_type}/{id}?expires={unix}&signature={hex}
//! ```
//!
//! The signature is HMAC-SHA256 over `{resource_type}/{delivery_type}/{id}:{expires}`
//! with a server-held key. Changing any component, or presenting the URL
//! after `expires`, fails verification.
//!
//! # Key Management
//!
//! - `delivery.signing_key` in the config wins when set (supports `${VAR}`).
//! - Otherwise a 32-byte random key is kept at `docguard.signing.key` in
//!   the data directory, created on first use with 0600 permissions.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngExt;
use serde::Serialize;
use sha2::Sha256;
use std::fs;
use std::path::Path;
use subtle::ConstantTimeEq;
use tracing::info;
use url::Url;

use super::kinds::Combination;

type HmacSha256 = Hmac<Sha256>;

const SIGNING_KEY_FILENAME: &str = "docguard.signing.key";
const SIGNING_KEY_LEN: usize = 32;
const MAX_TTL_SECS: u64 = 366 * 24 * 3600;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signed URL expired")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
    #[error("invalid origin URL: {0}")]
    Origin(String),
    #[error("unusable signing key")]
    Key,
}

/// Create the signing key file if it does not exist yet.
///
/// Returns `true` when a new key was written.
pub fn ensure_signing_key(data_dir: &Path) -> Result<bool> {
    let key_path = data_dir.join(SIGNING_KEY_FILENAME);
    if key_path.exists() {
        return Ok(false);
    }

    let mut key = [0u8; SIGNING_KEY_LEN];
    rand::rng().fill(&mut key);

    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    fs::write(&key_path, key).context("Failed to write signing key")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&key_path, fs::Permissions::from_mode(0o600))
            .context("Failed to set signing key permissions")?;
    }

    info!("Generated URL signing key at {}", key_path.display());
    Ok(true)
}

pub fn read_signing_key(data_dir: &Path) -> Result<Vec<u8>> {
    let key_path = data_dir.join(SIGNING_KEY_FILENAME);
    let bytes = fs::read(&key_path)
        .context("Failed to read signing key. Run `docguard key init`.")?;

    if bytes.len() != SIGNING_KEY_LEN {
        anyhow::bail!(
            "Signing key has unexpected length {} (expected {})",
            bytes.len(),
            SIGNING_KEY_LEN
        );
    }
    Ok(bytes)
}

/// Key bytes for URL signing: the configured key, else the key file
/// (generated when missing).
pub fn load_signing_key(configured: Option<&str>, data_dir: &Path) -> Result<Vec<u8>> {
    match configured {
        Some(key) if !key.is_empty() => Ok(key.as_bytes().to_vec()),
        _ => {
            ensure_signing_key(data_dir)?;
            read_signing_key(data_dir)
        }
    }
}

/// An issued URL. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
    #[serde(flatten)]
    pub combination: Combination,
}

#[derive(Clone)]
pub struct UrlSigner {
    key: Vec<u8>,
    origin: String,
    ttl: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("origin", &self.origin)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(key: Vec<u8>, origin: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            key,
            origin: origin.into(),
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn sign(&self, id: &str, combination: Combination) -> Result<SignedUrl, SignatureError> {
        self.sign_at(id, combination, Utc::now())
    }

    pub fn sign_at(
        &self,
        id: &str,
        combination: Combination,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl, SignatureError> {
        let expires_at = now + self.ttl;
        let expires = expires_at.timestamp();
        let signature = self.signature(id, combination, expires)?;

        let mut url =
            Url::parse(&self.origin).map_err(|e| SignatureError::Origin(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SignatureError::Origin(self.origin.clone()))?
            .pop_if_empty()
            .push(combination.resource_type.as_str())
            .push(combination.delivery_type.as_str())
            .push(id);
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);

        Ok(SignedUrl {
            url: url.into(),
            expires_at,
            combination,
        })
    }

    pub fn verify(
        &self,
        id: &str,
        combination: Combination,
        expires: i64,
        signature: &str,
    ) -> Result<(), SignatureError> {
        self.verify_at(id, combination, expires, signature, Utc::now())
    }

    /// Valid iff the signature matches and `now` is not past `expires`.
    pub fn verify_at(
        &self,
        id: &str,
        combination: Combination,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let expected = self.signature(id, combination, expires)?;
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(SignatureError::Mismatch);
        }
        if now.timestamp() > expires {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }

    fn signature(
        &self,
        id: &str,
        combination: Combination,
        expires: i64,
    ) -> Result<String, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| SignatureError::Key)?;
        mac.update(
            format!(
                "{}/{}/{}:{}",
                combination.resource_type, combination.delivery_type, id, expires
            )
            .as_bytes(),
        );
        Ok(hex_encode(&mac.finalize().into_bytes()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::kinds::{DeliveryType, ResourceType};

    const PDF: Combination = Combination::new(ResourceType::Raw, DeliveryType::Authenticated);

    fn signer() -> UrlSigner {
        UrlSigner::new(vec![7u8; 32], "https://cdn.example.com/storage", 300)
    }

    fn query(url: &str) -> (i64, String) {
        let url = Url::parse(url).unwrap();
        let mut expires = 0;
        let mut signature = String::new();
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "expires" => expires = v.parse().unwrap(),
                "signature" => signature = v.into_owned(),
                _ => {}
            }
        }
        (expires, signature)
    }

    #[test]
    fn url_names_the_exact_combination() {
        let now = Utc::now();
        let signed = signer().sign_at("doc 1", PDF, now).unwrap();
        assert!(
            signed
                .url
                .starts_with("https://cdn.example.com/storage/raw/authenticated/doc%201?expires=")
        );
        assert_eq!(signed.expires_at, now + Duration::seconds(300));
    }

    #[test]
    fn valid_within_window_and_rejected_after() {
        let signer = signer();
        let now = Utc::now();
        let signed = signer.sign_at("doc-1", PDF, now).unwrap();
        let (expires, signature) = query(&signed.url);

        assert_eq!(signer.verify_at("doc-1", PDF, expires, &signature, now), Ok(()));
        assert_eq!(
            signer.verify_at("doc-1", PDF, expires, &signature, now + Duration::seconds(300)),
            Ok(())
        );
        assert_eq!(
            signer.verify_at("doc-1", PDF, expires, &signature, now + Duration::seconds(301)),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn overlapping_urls_are_each_valid() {
        let signer = signer();
        let now = Utc::now();
        let first = signer.sign_at("doc-1", PDF, now).unwrap();
        let second = signer
            .sign_at("doc-1", PDF, now + Duration::seconds(1))
            .unwrap();
        assert_ne!(first.url, second.url);

        let inside_both = now + Duration::seconds(150);
        for signed in [&first, &second] {
            let (expires, signature) = query(&signed.url);
            assert_eq!(
                signer.verify_at("doc-1", PDF, expires, &signature, inside_both),
                Ok(())
            );
        }
    }

    #[test]
    fn any_changed_component_breaks_signature() {
        let signer = signer();
        let signed = signer.sign("doc-1", PDF).unwrap();
        let (expires, signature) = query(&signed.url);
        let image = Combination::new(ResourceType::Image, DeliveryType::Authenticated);
        let upload = Combination::new(ResourceType::Raw, DeliveryType::Upload);

        assert_eq!(
            signer.verify("doc-2", PDF, expires, &signature),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            signer.verify("doc-1", image, expires, &signature),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            signer.verify("doc-1", upload, expires, &signature),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            signer.verify("doc-1", PDF, expires + 60, &signature),
            Err(SignatureError::Mismatch)
        );

        let other = UrlSigner::new(vec![8u8; 32], "https://cdn.example.com/storage", 300);
        assert_eq!(
            other.verify("doc-1", PDF, expires, &signature),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn signing_key_generation_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(ensure_signing_key(tmp.path()).unwrap());
        let key1 = read_signing_key(tmp.path()).unwrap();
        assert!(!ensure_signing_key(tmp.path()).unwrap());
        let key2 = read_signing_key(tmp.path()).unwrap();
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), SIGNING_KEY_LEN);
    }

    #[cfg(unix)]
    #[test]
    fn signing_key_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        ensure_signing_key(tmp.path()).unwrap();
        let perms = fs::metadata(tmp.path().join(SIGNING_KEY_FILENAME))
            .unwrap()
            .permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }

    #[test]
    fn configured_key_takes_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let key = load_signing_key(Some("from-config"), tmp.path()).unwrap();
        assert_eq!(key, b"from-config");
        assert!(!tmp.path().join(SIGNING_KEY_FILENAME).exists());

        let key = load_signing_key(None, tmp.path()).unwrap();
        assert_eq!(key.len(), SIGNING_KEY_LEN);
    }

    #[test]
    fn short_key_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(SIGNING_KEY_FILENAME), b"short").unwrap();
        assert!(read_signing_key(tmp.path()).is_err());
    }
}
