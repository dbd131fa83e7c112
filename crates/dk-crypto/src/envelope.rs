//! Message signing and the sealed-box hybrid encryption envelope (spec.md
//! §4.1, C2 Crypto Envelope).
//!
//! Encryption is a standard ECDH sealed box: an ephemeral X25519 keypair is
//! generated per message, Diffie-Hellman with the recipient's derived X25519
//! public key produces a shared secret that wraps a random per-message
//! ChaCha20-Poly1305 content key, and the content key encrypts the payload.
//! The recipient only needs their own Ed25519 seed (never shared) to recover
//! the matching X25519 secret and unwrap the content key.

use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};

use crate::error::{CryptoError, CryptoResult};
use crate::identity::{encryption_public_key_from_signing_public_key, verify_with_public_key};

/// Wire form of a sealed-box message, per spec.md §4.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Sender's ephemeral X25519 public key for this message.
    pub ephemeral_public_key: Vec<u8>,
    /// Nonce for unwrapping `encrypted_key`.
    pub key_nonce: Vec<u8>,
    /// The random per-message content key, wrapped under the ECDH shared
    /// secret.
    pub encrypted_key: Vec<u8>,
    /// Nonce for `encrypted_content`.
    pub data_nonce: Vec<u8>,
    /// The plaintext payload, encrypted under the content key.
    pub encrypted_content: Vec<u8>,
}

/// A signed message ready for transport: the signature covers the exact
/// serialized payload bytes so the recipient can verify before
/// deserializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedMessage {
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    pub signer_public_key: Vec<u8>,
}

/// Sign arbitrary bytes with a node's Ed25519 keypair.
pub fn sign(keypair: &Ed25519KeyPair, payload: &[u8]) -> SignedMessage {
    let signature = keypair.sign(payload).as_ref().to_vec();
    SignedMessage {
        payload: payload.to_vec(),
        signature,
        signer_public_key: keypair.public_key().as_ref().to_vec(),
    }
}

/// Verify a [`SignedMessage`] against its embedded signer public key. The
/// caller is responsible for checking that `signer_public_key` is the
/// expected sender (see `dk-directory`) — this function only checks
/// cryptographic validity.
pub fn verify(message: &SignedMessage) -> CryptoResult<()> {
    if verify_with_public_key(
        &message.signer_public_key,
        &message.payload,
        &message.signature,
    ) {
        Ok(())
    } else {
        Err(CryptoError::SignatureInvalid)
    }
}

/// Seal `plaintext` for `recipient_signing_public_key`. The recipient's
/// encryption public key is derived from their signing public key alone, so
/// the sender never needs any out-of-band encryption key exchange.
pub fn encrypt(
    recipient_signing_public_key: &[u8],
    plaintext: &[u8],
) -> CryptoResult<EncryptedEnvelope> {
    let recipient_encryption_key =
        encryption_public_key_from_signing_public_key(recipient_signing_public_key)?;

    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
    let shared_secret = ephemeral_secret.diffie_hellman(&recipient_encryption_key);

    let mut content_key_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut content_key_bytes);

    let key_cipher = ChaCha20Poly1305::new(Key::from_slice(shared_secret.as_bytes()));
    let mut key_nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut key_nonce_bytes);
    let key_nonce = Nonce::from_slice(&key_nonce_bytes);
    let encrypted_key = key_cipher
        .encrypt(key_nonce, content_key_bytes.as_slice())
        .map_err(|_| CryptoError::DecryptFailed)?;

    let content_cipher = ChaCha20Poly1305::new(Key::from_slice(&content_key_bytes));
    let mut data_nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut data_nonce_bytes);
    let data_nonce = Nonce::from_slice(&data_nonce_bytes);
    let encrypted_content = content_cipher
        .encrypt(data_nonce, plaintext)
        .map_err(|_| CryptoError::DecryptFailed)?;

    Ok(EncryptedEnvelope {
        ephemeral_public_key: ephemeral_public.as_bytes().to_vec(),
        key_nonce: key_nonce_bytes.to_vec(),
        encrypted_key,
        data_nonce: data_nonce_bytes.to_vec(),
        encrypted_content,
    })
}

/// Unseal an [`EncryptedEnvelope`] using the recipient's own X25519 secret
/// (derived from their own Ed25519 seed by [`crate::identity::Identity`]).
pub fn decrypt(recipient_secret: &StaticSecret, envelope: &EncryptedEnvelope) -> CryptoResult<Vec<u8>> {
    let ephemeral_public_bytes: [u8; 32] = envelope
        .ephemeral_public_key
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::DecryptFailed)?;
    let ephemeral_public = X25519PublicKey::from(ephemeral_public_bytes);

    let shared_secret = recipient_secret.diffie_hellman(&ephemeral_public);
    let key_cipher = ChaCha20Poly1305::new(Key::from_slice(shared_secret.as_bytes()));
    let key_nonce = Nonce::from_slice(&envelope.key_nonce);
    let content_key_bytes = key_cipher
        .decrypt(key_nonce, envelope.encrypted_key.as_slice())
        .map_err(|_| CryptoError::DecryptFailed)?;

    let content_cipher = ChaCha20Poly1305::new(Key::from_slice(&content_key_bytes));
    let data_nonce = Nonce::from_slice(&envelope.data_nonce);
    content_cipher
        .decrypt(data_nonce, envelope.encrypted_content.as_slice())
        .map_err(|_| CryptoError::DecryptFailed)
}
