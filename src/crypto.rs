//! Per-message authenticated encryption for log lines
//!
//! Every message is sealed independently with AES-256-GCM under a fresh random
//! 12-byte nonce. The on-disk framing is `nonce (12) || ciphertext || tag (16)`,
//! base64-encoded so that one entry stays one line.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of AES-GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// 256-bit key, overwritten with zeros when dropped
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Validate and copy key bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Decode a base64 key, as stored in key files
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(STANDARD.decode(encoded.trim())?);
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Future returned by a [`KeyProvider`]
pub type KeyFuture<'a> =
    Pin<Box<dyn Future<Output = Result<EncryptionKey, CryptoError>> + Send + 'a>>;

/// Asynchronous source of the encryption key, asked once per batch
pub trait KeyProvider: Send + Sync {
    fn fetch_key(&self) -> KeyFuture<'_>;
}

impl<F, Fut> KeyProvider for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    fn fetch_key(&self) -> KeyFuture<'_> {
        let fut = self();
        Box::pin(async move {
            let bytes = Zeroizing::new(
                fut.await
                    .map_err(|e| CryptoError::KeyProvider(e.to_string()))?,
            );
            EncryptionKey::from_slice(&bytes)
        })
    }
}

/// Where the batch key comes from
#[derive(Clone)]
pub enum KeySource {
    /// Fixed key; every read hands out a fresh copy
    Static(EncryptionKey),
    /// Provider invoked fresh for every batch
    Provider(Arc<dyn KeyProvider>),
}

impl KeySource {
    /// Retrieve and validate the key for one batch
    pub async fn resolve(&self) -> Result<EncryptionKey, CryptoError> {
        match self {
            KeySource::Static(key) => EncryptionKey::from_slice(key.as_bytes()),
            KeySource::Provider(provider) => provider.fetch_key().await,
        }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Static(_) => f.write_str("KeySource::Static"),
            KeySource::Provider(_) => f.write_str("KeySource::Provider"),
        }
    }
}

/// Single-batch AES-256-GCM sealer
///
/// Built from a key that is zeroed as soon as the cipher is set up. Instances
/// are owned by exactly one batch and dropped with it.
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    /// Create an encryptor, consuming (and zeroing) the key
    pub fn new(key: EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        drop(key);
        Self { cipher }
    }

    /// Seal one message: `nonce || ciphertext || tag`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open one message produced by [`Encryptor::encrypt`]
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }
        let (nonce, sealed) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    /// Seal a text line into its base64 on-disk form
    pub fn encrypt_line(&self, line: &str) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.encrypt(line.as_bytes())?))
    }

    /// Reverse [`Encryptor::encrypt_line`]
    pub fn decrypt_line(&self, line: &str) -> Result<String, CryptoError> {
        let data = STANDARD.decode(line.trim())?;
        let plain = self.decrypt(&data)?;
        String::from_utf8(plain).map_err(|_| CryptoError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> EncryptionKey {
        EncryptionKey::from_slice(&[byte; KEY_SIZE]).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let enc = Encryptor::new(key(7));
        for message in ["", "hello", "line with ünïcödé and \"quotes\""] {
            let sealed = enc.encrypt(message.as_bytes()).unwrap();
            assert_eq!(sealed.len(), NONCE_SIZE + message.len() + TAG_SIZE);
            assert_eq!(enc.decrypt(&sealed).unwrap(), message.as_bytes());
        }
    }

    #[test]
    fn test_fresh_nonce_per_message() {
        let enc = Encryptor::new(key(1));
        let a = enc.encrypt(b"same").unwrap();
        let b = enc.encrypt(b"same").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let sealed = Encryptor::new(key(1)).encrypt(b"secret").unwrap();
        let err = Encryptor::new(key(2)).decrypt(&sealed).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_flipped_tag_fails_authentication() {
        let enc = Encryptor::new(key(3));
        let mut sealed = enc.encrypt(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            enc.decrypt(&sealed).unwrap_err(),
            CryptoError::AuthenticationFailed
        ));
    }

    #[test]
    fn test_short_input_fails_authentication() {
        let enc = Encryptor::new(key(3));
        let err = enc.decrypt(&[0u8; NONCE_SIZE + TAG_SIZE - 1]).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_line_round_trip() {
        let enc = Encryptor::new(key(9));
        let line = enc.encrypt_line("{\"m\":\"hi\"}").unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(enc.decrypt_line(&line).unwrap(), "{\"m\":\"hi\"}");
        assert!(matches!(
            enc.decrypt_line("plain text line").unwrap_err(),
            CryptoError::Encoding(_) | CryptoError::AuthenticationFailed
        ));
    }

    #[test]
    fn test_key_length_validated() {
        let err = EncryptionKey::from_slice(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn test_provider_key_validated_on_every_fetch() {
        let good = KeySource::Provider(Arc::new(|| async { Ok::<_, anyhow::Error>(vec![5u8; KEY_SIZE]) }));
        let key = tokio_test::block_on(good.resolve()).unwrap();
        assert_eq!(key.as_bytes(), &[5u8; KEY_SIZE]);

        let short = KeySource::Provider(Arc::new(|| async { Ok::<_, anyhow::Error>(vec![5u8; 8]) }));
        let err = tokio_test::block_on(short.resolve()).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { actual: 8, .. }));

        let failing = KeySource::Provider(Arc::new(|| async {
            Err::<Vec<u8>, _>(anyhow::anyhow!("keychain locked"))
        }));
        let err = tokio_test::block_on(failing.resolve()).unwrap_err();
        assert!(matches!(err, CryptoError::KeyProvider(ref m) if m.contains("keychain")));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let debug = format!("{:?}", key(0xAB));
        assert!(!debug.contains("171"));
        assert!(debug.contains("redacted"));
    }
}
