use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::secret::Secret;
use crate::store_key::{generate_salt, StoreKey, SALT_SIZE};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;

/// Encrypt plaintext with XChaCha20-Poly1305.
/// Returns (ciphertext, nonce) pair.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> CryptoResult<(Vec<u8>, [u8; NONCE_SIZE])> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);
    Ok((ciphertext, nonce_bytes))
}

/// Decrypt ciphertext with XChaCha20-Poly1305.
pub fn decrypt(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    key: &[u8; KEY_SIZE],
) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = chacha20poly1305::XNonce::from_slice(nonce);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Passphrase-sealed payload as stored on disk. All fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Seal `plaintext` under a key derived from `secret` with a fresh salt and nonce.
pub fn seal(plaintext: &[u8], secret: &Secret) -> CryptoResult<SealedPayload> {
    let salt = generate_salt();
    let key = StoreKey::derive(secret, &salt)?;
    let (ciphertext, nonce) = encrypt(plaintext, key.as_bytes())?;

    let b64 = base64::engine::general_purpose::STANDARD;
    Ok(SealedPayload {
        salt: b64.encode(salt),
        nonce: b64.encode(nonce),
        ciphertext: b64.encode(ciphertext),
    })
}

/// Open a sealed payload. Fails with `DecryptionFailed` on a wrong passphrase.
pub fn open(sealed: &SealedPayload, secret: &Secret) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let b64 = base64::engine::general_purpose::STANDARD;
    let salt = b64
        .decode(&sealed.salt)
        .map_err(|e| CryptoError::Base64(e.to_string()))?;
    let nonce_bytes = b64
        .decode(&sealed.nonce)
        .map_err(|e| CryptoError::Base64(e.to_string()))?;
    let ciphertext = b64
        .decode(&sealed.ciphertext)
        .map_err(|e| CryptoError::Base64(e.to_string()))?;

    if salt.len() != SALT_SIZE {
        return Err(CryptoError::InvalidSaltLength {
            expected: SALT_SIZE,
            got: salt.len(),
        });
    }
    let nonce: [u8; NONCE_SIZE] =
        nonce_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                got: nonce_bytes.len(),
            })?;

    let key = StoreKey::derive(secret, &salt)?;
    decrypt(&ciphertext, &nonce, key.as_bytes()).map(Zeroizing::new)
}
