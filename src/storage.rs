//! Blob storage for submitted documents.
//!
//! Files live under a local root, addressed by an opaque storage key.
//! Downloads normally stream straight from disk; when that path fails on
//! the client side, the dashboard falls back to a short-lived signed URL
//! whose token is minted and redeemed here.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::config::StorageConfig;
use crate::error::StorageError;

type HmacSha256 = Hmac<Sha256>;

/// A fetched object: raw bytes plus the content type to serve.
#[derive(Debug, Clone)]
pub struct FetchedBlob {
    pub bytes: Vec<u8>,
    pub mime: String,
}

pub struct BlobStore {
    root: PathBuf,
    signing_key: SecretString,
    token_ttl: Duration,
}

impl BlobStore {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            root: config.root.clone(),
            signing_key: config.signing_key.clone(),
            token_ttl: Duration::from_secs(config.signed_url_ttl_secs),
        }
    }

    /// Read an object. The MIME type is guessed from the key's extension
    /// unless the caller knows better from the file row.
    pub async fn fetch(&self, storage_key: &str) -> Result<FetchedBlob, StorageError> {
        let path = self.resolve(storage_key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    key: storage_key.to_string(),
                });
            }
            Err(err) => {
                return Err(StorageError::ReadFailed {
                    key: storage_key.to_string(),
                    message: err.to_string(),
                });
            }
        };
        Ok(FetchedBlob {
            bytes,
            mime: guess_mime(storage_key),
        })
    }

    pub async fn put(&self, storage_key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(storage_key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::WriteFailed {
                    key: storage_key.to_string(),
                    message: e.to_string(),
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::WriteFailed {
                key: storage_key.to_string(),
                message: e.to_string(),
            })
    }

    /// Mint a signed, expiring token for one object.
    pub fn issue_token(&self, storage_key: &str) -> Result<String, StorageError> {
        // Only sign keys we would also serve.
        self.resolve(storage_key)?;
        let expires = unix_now() + self.token_ttl.as_secs();
        Ok(sign_token(&self.signing_key, storage_key, expires))
    }

    /// Validate a token and return the storage key it grants.
    pub fn redeem_token(&self, token: &str) -> Result<String, StorageError> {
        redeem_token_at(&self.signing_key, token, unix_now())
    }

    /// Map a storage key onto the root, rejecting traversal.
    fn resolve(&self, storage_key: &str) -> Result<PathBuf, StorageError> {
        let relative = sanitize_storage_key(storage_key)?;
        Ok(self.root.join(relative))
    }
}

fn sanitize_storage_key(raw: &str) -> Result<PathBuf, StorageError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains('\\') {
        return Err(StorageError::NotFound {
            key: raw.to_string(),
        });
    }
    let path = Path::new(trimmed);
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            // Traversal or absolute keys never map into the root.
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::NotFound {
                    key: raw.to_string(),
                });
            }
        }
    }
    if normalized.components().next().is_none() {
        return Err(StorageError::NotFound {
            key: raw.to_string(),
        });
    }
    Ok(normalized)
}

fn guess_mime(storage_key: &str) -> String {
    mime_guess::from_path(storage_key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn mac_for(signing_key: &SecretString, payload: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(signing_key.expose_secret().as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(payload.as_bytes());
    mac
}

fn sign_token(signing_key: &SecretString, storage_key: &str, expires: u64) -> String {
    let payload = format!("{expires}:{storage_key}");
    let signature = mac_for(signing_key, &payload).finalize().into_bytes();
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(payload.as_bytes()),
        URL_SAFE_NO_PAD.encode(signature)
    )
}

fn redeem_token_at(
    signing_key: &SecretString,
    token: &str,
    now: u64,
) -> Result<String, StorageError> {
    let (payload_b64, signature_b64) = token
        .split_once('.')
        .ok_or_else(|| StorageError::InvalidToken("missing signature".to_string()))?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| StorageError::InvalidToken("bad payload encoding".to_string()))?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| StorageError::InvalidToken("bad signature encoding".to_string()))?;
    let payload = String::from_utf8(payload_bytes)
        .map_err(|_| StorageError::InvalidToken("payload is not utf-8".to_string()))?;

    mac_for(signing_key, &payload)
        .verify_slice(&signature)
        .map_err(|_| StorageError::InvalidToken("signature mismatch".to_string()))?;

    let (expires_raw, storage_key) = payload
        .split_once(':')
        .ok_or_else(|| StorageError::InvalidToken("malformed payload".to_string()))?;
    let expires: u64 = expires_raw
        .parse()
        .map_err(|_| StorageError::InvalidToken("bad expiry".to_string()))?;
    if now > expires {
        return Err(StorageError::TokenExpired);
    }
    Ok(storage_key.to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;

    use super::{
        BlobStore, guess_mime, redeem_token_at, sanitize_storage_key, sign_token,
    };
    use crate::config::StorageConfig;
    use crate::error::StorageError;

    fn key() -> SecretString {
        SecretString::from("0123456789abcdef0123456789abcdef")
    }

    fn store(root: &std::path::Path) -> BlobStore {
        BlobStore::from_config(&StorageConfig {
            root: root.to_path_buf(),
            signing_key: key(),
            signed_url_ttl_secs: 3600,
        })
    }

    #[test]
    fn storage_keys_cannot_escape_the_root() {
        assert!(sanitize_storage_key("cases/7/passport.pdf").is_ok());
        assert!(sanitize_storage_key("../etc/passwd").is_err());
        assert!(sanitize_storage_key("/etc/passwd").is_err());
        assert!(sanitize_storage_key("a/../../b").is_err());
        assert!(sanitize_storage_key("").is_err());
        assert!(sanitize_storage_key("a\\b").is_err());
    }

    #[test]
    fn tokens_round_trip_and_expire() {
        let token = sign_token(&key(), "cases/7/passport.pdf", 1_000);
        assert_eq!(
            redeem_token_at(&key(), &token, 999).unwrap(),
            "cases/7/passport.pdf"
        );
        assert!(matches!(
            redeem_token_at(&key(), &token, 1_001),
            Err(StorageError::TokenExpired)
        ));
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let token = sign_token(&key(), "cases/7/passport.pdf", u64::MAX / 2);
        let mut tampered = token.clone();
        tampered.replace_range(0..1, "Z");
        assert!(redeem_token_at(&key(), &tampered, 0).is_err());

        let other_key = SecretString::from("ffffffffffffffffffffffffffffffff");
        assert!(redeem_token_at(&other_key, &token, 0).is_err());
    }

    #[test]
    fn mime_guessing_defaults_to_octet_stream() {
        assert_eq!(guess_mime("scan.pdf"), "application/pdf");
        assert_eq!(guess_mime("blob.unknown-ext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn put_then_fetch_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store.put("cases/7/contract.pdf", b"%PDF-1.7").await.unwrap();
        let blob = store.fetch("cases/7/contract.pdf").await.unwrap();
        assert_eq!(blob.bytes, b"%PDF-1.7");
        assert_eq!(blob.mime, "application/pdf");

        assert!(matches!(
            store.fetch("cases/7/missing.pdf").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn issued_tokens_redeem_to_their_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let token = store.issue_token("cases/9/visa.jpg").unwrap();
        assert_eq!(store.redeem_token(&token).unwrap(), "cases/9/visa.jpg");
    }
}
