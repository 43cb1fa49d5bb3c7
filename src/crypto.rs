//! Token encryption module using AES-256-GCM
//!
//! Access and refresh tokens are encrypted at rest with AES-256-GCM, using
//! additional authenticated data (AAD) derived from the owning account so a
//! ciphertext cannot be replayed onto another row.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::account::Model as AccountModel;

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::EncryptionFailed(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // Version byte, then nonce, then ciphertext+tag.
    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    // Legacy plaintext payloads carry no version marker.
    if ciphertext[0] != VERSION_ENCRYPTED {
        return Ok(ciphertext.to_vec());
    }

    if ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Determine if a payload is using the encrypted format
pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

fn account_aad(account: &AccountModel) -> String {
    format!("{}|{}", account.tenant_id, account.external_id)
}

/// Type alias for encrypted token result
type EncryptedTokens = Result<(Option<Vec<u8>>, Option<Vec<u8>>), CryptoError>;

/// Encrypt access/refresh tokens for an account
pub fn encrypt_account_tokens(
    key: &CryptoKey,
    account: &AccountModel,
    access_token: Option<&str>,
    refresh_token: Option<&str>,
) -> EncryptedTokens {
    let aad = account_aad(account);

    let encrypted_access_token = access_token
        .map(|token| encrypt_bytes(key, aad.as_bytes(), token.as_bytes()))
        .transpose()?;

    let encrypted_refresh_token = refresh_token
        .map(|token| encrypt_bytes(key, aad.as_bytes(), token.as_bytes()))
        .transpose()?;

    Ok((encrypted_access_token, encrypted_refresh_token))
}

/// Type alias for decrypted token result
type DecryptedTokens = Result<(Option<String>, Option<String>), CryptoError>;

/// Decrypt access/refresh tokens for an account
pub fn decrypt_account_tokens(key: &CryptoKey, account: &AccountModel) -> DecryptedTokens {
    let aad = account_aad(account);

    let decrypt_field = |field: Option<&Vec<u8>>| -> Result<Option<String>, CryptoError> {
        match field {
            Some(token) if is_encrypted_payload(token) => {
                decrypt_bytes(key, aad.as_bytes(), token)
                    .and_then(|bytes| {
                        String::from_utf8(bytes).map_err(|e| {
                            CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e))
                        })
                    })
                    .map(Some)
            }
            Some(token) => String::from_utf8(token.clone())
                .map(Some)
                .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e))),
            None => Ok(None),
        }
    };

    let access = decrypt_field(account.access_token_ciphertext.as_ref())?;
    let refresh = decrypt_field(account.refresh_token_ciphertext.as_ref())?;

    Ok((access, refresh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    fn sample_account(
        access_token_ciphertext: Option<Vec<u8>>,
        refresh_token_ciphertext: Option<Vec<u8>>,
    ) -> AccountModel {
        AccountModel {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            external_id: "shop-123".to_string(),
            display_name: None,
            status: "active".to_string(),
            access_token_ciphertext,
            refresh_token_ciphertext,
            expires_at: None,
            signing_key_ref: None,
            metadata: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let encrypted = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let decrypted = decrypt_bytes(&key, aad, &encrypted).expect("decryption succeeds");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn different_aad_fails() {
        let key = test_key();
        let plaintext = b"secret message";

        let encrypted = encrypt_bytes(&key, b"aad-1", plaintext).expect("encryption succeeds");
        let result = decrypt_bytes(&key, b"aad-2", &encrypted);

        assert!(result.is_err());
    }

    #[test]
    fn modified_ciphertext_fails() {
        let key = test_key();
        let aad = b"test-aad";

        let mut encrypted = encrypt_bytes(&key, aad, b"secret message").expect("encrypt");
        encrypted[13] ^= 0x01;

        assert!(decrypt_bytes(&key, aad, &encrypted).is_err());
    }

    #[test]
    fn nonce_uniqueness() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let encrypted1 = encrypt_bytes(&key, aad, plaintext).expect("encrypt");
        let encrypted2 = encrypt_bytes(&key, aad, plaintext).expect("encrypt");

        assert_ne!(&encrypted1[1..13], &encrypted2[1..13]);
        assert_eq!(decrypt_bytes(&key, aad, &encrypted1).unwrap(), plaintext);
        assert_eq!(decrypt_bytes(&key, aad, &encrypted2).unwrap(), plaintext);
    }

    #[test]
    fn legacy_token_passthrough() {
        let key = test_key();
        let legacy = b"legacy-token".to_vec();

        let result = decrypt_bytes(&key, b"aad", &legacy).expect("legacy plaintext returned");
        assert_eq!(result, legacy);
        assert!(!is_encrypted_payload(&legacy));
    }

    #[test]
    fn account_tokens_roundtrip() {
        let key = test_key();
        let account = sample_account(None, None);

        let (access_ct, refresh_ct) =
            encrypt_account_tokens(&key, &account, Some("access-abc"), Some("refresh-xyz"))
                .expect("encryption succeeds");

        let account = AccountModel {
            access_token_ciphertext: access_ct,
            refresh_token_ciphertext: refresh_ct,
            ..account
        };

        let (access, refresh) = decrypt_account_tokens(&key, &account).expect("decrypt");
        assert_eq!(access.as_deref(), Some("access-abc"));
        assert_eq!(refresh.as_deref(), Some("refresh-xyz"));
    }

    #[test]
    fn account_tokens_bound_to_account() {
        let key = test_key();
        let account = sample_account(None, None);

        let (access_ct, _) = encrypt_account_tokens(&key, &account, Some("access-abc"), None)
            .expect("encryption succeeds");

        // Splice the ciphertext onto a different account.
        let other = AccountModel {
            access_token_ciphertext: access_ct,
            ..sample_account(None, None)
        };

        assert!(decrypt_account_tokens(&key, &other).is_err());
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert!(CryptoKey::new(vec![0u8; 16]).is_err());
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }

    #[test]
    fn insufficient_ciphertext_length() {
        let key = test_key();
        let short = vec![VERSION_ENCRYPTED, 0x02];

        let result = decrypt_bytes(&key, b"aad", &short);
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));
    }
}
