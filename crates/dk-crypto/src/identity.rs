//! Long-lived node identity: an Ed25519 signing keypair persisted to disk,
//! with an X25519 encryption keypair derived deterministically from it using
//! the standard Ed25519-to-Curve25519 birational map (the same technique
//! libsodium's `crypto_sign_ed25519_*_to_curve25519` uses for sealed boxes).
//!
//! Mirrors the file-based persistence idiom used throughout the teacher
//! repository (`tokio::fs::read_to_string(...).await.context(...)`), but is
//! kept synchronous here since identity load/generate only runs once at
//! process startup.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use curve25519_dalek::edwards::CompressedEdwardsY;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{self, Ed25519KeyPair, KeyPair};
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::{CryptoError, CryptoResult};

const PRIVATE_KEY_FILE: &str = "private_key.pem";
const PUBLIC_KEY_FILE: &str = "public_key.pem";
const PEM_PRIVATE_LABEL: &str = "DK NODE SEED";
const PEM_PUBLIC_LABEL: &str = "DK NODE PUBLIC KEY";

/// A node's long-lived identity: the 32-byte Ed25519 seed (from which the
/// signing keypair is reconstructed on demand), plus the X25519 encryption
/// keys derived from it. Spec invariant: the encryption keypair is never
/// independently generated or persisted.
pub struct Identity {
    pub user_id: String,
    seed: [u8; 32],
    signing_public_key: Vec<u8>,
    encryption_secret: StaticSecret,
    encryption_public_key: X25519PublicKey,
}

impl Identity {
    /// Load the identity from `keys_dir` if present, otherwise generate and
    /// persist a fresh one.
    pub fn load_or_generate(keys_dir: impl AsRef<Path>, user_id: &str) -> CryptoResult<Self> {
        let keys_dir = keys_dir.as_ref();
        let private_path = keys_dir.join(PRIVATE_KEY_FILE);

        if private_path.exists() {
            Self::load(keys_dir)
        } else {
            let identity = Self::generate(user_id)?;
            identity.persist(keys_dir)?;
            Ok(identity)
        }
    }

    /// Generate a fresh identity from a freshly sampled 32-byte seed.
    pub fn generate(user_id: &str) -> CryptoResult<Self> {
        let rng = SystemRandom::new();
        let mut seed = [0u8; 32];
        rng.fill(&mut seed)
            .map_err(|_| CryptoError::KeyDerivationFailed("seed generation failed".into()))?;
        Self::from_seed(user_id.to_string(), seed)
    }

    fn from_seed(user_id: String, seed: [u8; 32]) -> CryptoResult<Self> {
        let keypair = Ed25519KeyPair::from_seed_unchecked(&seed)
            .map_err(|e| CryptoError::KeyDerivationFailed(format!("seed rejected: {e}")))?;
        let signing_public_key = keypair.public_key().as_ref().to_vec();

        let encryption_secret = derive_x25519_secret_from_seed(&seed);
        let encryption_public_key = X25519PublicKey::from(&encryption_secret);

        Ok(Self {
            user_id,
            seed,
            signing_public_key,
            encryption_secret,
            encryption_public_key,
        })
    }

    /// Reconstruct the Ed25519 keypair for signing. `ring`'s key types are
    /// not `Clone`, so callers that need to sign reconstruct transiently
    /// from the stored seed.
    pub fn keypair(&self) -> CryptoResult<Ed25519KeyPair> {
        Ed25519KeyPair::from_seed_unchecked(&self.seed)
            .map_err(|e| CryptoError::KeyDerivationFailed(format!("seed rejected: {e}")))
    }

    pub fn signing_public_key(&self) -> &[u8] {
        &self.signing_public_key
    }

    pub fn encryption_secret(&self) -> &StaticSecret {
        &self.encryption_secret
    }

    pub fn encryption_public_key(&self) -> &X25519PublicKey {
        &self.encryption_public_key
    }

    fn persist(&self, keys_dir: &Path) -> CryptoResult<()> {
        fs::create_dir_all(keys_dir)?;

        let private_pem = to_pem(PEM_PRIVATE_LABEL, &self.seed);
        fs::write(keys_dir.join(PRIVATE_KEY_FILE), private_pem)?;

        let public_pem = to_pem(PEM_PUBLIC_LABEL, &self.signing_public_key);
        fs::write(keys_dir.join(PUBLIC_KEY_FILE), public_pem)?;

        fs::write(keys_dir.join("user_id"), &self.user_id)?;

        tracing::info!(keys_dir = %keys_dir.display(), "persisted node identity");
        Ok(())
    }

    fn load(keys_dir: &Path) -> CryptoResult<Self> {
        let private_pem = fs::read_to_string(keys_dir.join(PRIVATE_KEY_FILE))?;
        let seed_bytes = from_pem(&private_pem)
            .ok_or_else(|| CryptoError::KeyDerivationFailed("malformed seed PEM".into()))?;
        let seed: [u8; 32] = seed_bytes
            .try_into()
            .map_err(|_| CryptoError::KeyDerivationFailed("seed has wrong length".into()))?;

        let user_id = fs::read_to_string(keys_dir.join("user_id"))
            .unwrap_or_else(|_| "unknown".to_string())
            .trim()
            .to_string();

        tracing::info!(keys_dir = %keys_dir.display(), "loaded existing node identity");
        Self::from_seed(user_id, seed)
    }

    pub fn keys_dir_default() -> PathBuf {
        PathBuf::from("./keys")
    }
}

/// Standard Ed25519-seed-to-X25519-scalar expansion: hash the seed with
/// SHA-512 and clamp the low half, exactly as RFC 8032 derives the Ed25519
/// signing scalar, which is also the private scalar used by the birational
/// map to Curve25519.
fn derive_x25519_secret_from_seed(seed: &[u8; 32]) -> StaticSecret {
    let mut hasher = Sha512::new();
    hasher.update(seed);
    let digest = hasher.finalize();

    let mut scalar_bytes = [0u8; 32];
    scalar_bytes.copy_from_slice(&digest[..32]);
    // x25519-dalek's `StaticSecret::from` clamps internally, matching the
    // standard X25519 scalar-clamping rules.
    StaticSecret::from(scalar_bytes)
}

/// Derive the X25519 encryption public key that corresponds to a remote
/// peer's Ed25519 signing public key, using the Edwards-to-Montgomery
/// birational map. This lets `encrypt` target a recipient from their
/// signing key alone, with no private-key material involved.
pub fn encryption_public_key_from_signing_public_key(
    signing_public_key: &[u8],
) -> CryptoResult<X25519PublicKey> {
    let bytes: [u8; 32] = signing_public_key
        .try_into()
        .map_err(|_| CryptoError::KeyDerivationFailed("signing key has wrong length".into()))?;

    let edwards_point = CompressedEdwardsY(bytes)
        .decompress()
        .ok_or_else(|| CryptoError::KeyDerivationFailed("not a valid Ed25519 point".into()))?;

    let montgomery_point = edwards_point.to_montgomery();
    Ok(X25519PublicKey::from(montgomery_point.to_bytes()))
}

/// Verify a raw Ed25519 signature given only a public key, without needing
/// the full [`Identity`]. Used by C3/C4 to check signatures from peers whose
/// private keys we never hold.
pub fn verify_with_public_key(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    signature::UnparsedPublicKey::new(&signature::ED25519, public_key)
        .verify(message, signature)
        .is_ok()
}

fn to_pem(label: &str, bytes: &[u8]) -> String {
    let encoded = BASE64.encode(bytes);
    let mut body = String::new();
    for chunk in encoded.as_bytes().chunks(64) {
        body.push_str(std::str::from_utf8(chunk).expect("base64 output is ascii"));
        body.push('\n');
    }
    format!("-----BEGIN {label}-----\n{body}-----END {label}-----\n")
}

fn from_pem(pem: &str) -> Option<Vec<u8>> {
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    BASE64.decode(body).ok()
}

/// Decode a `public_key.pem`-style block (as returned by the relay's
/// `GET /users/:id/public_key`) into raw Ed25519 public key bytes.
pub fn pem_to_raw_public_key(pem: &str) -> CryptoResult<Vec<u8>> {
    from_pem(pem).ok_or_else(|| CryptoError::KeyDerivationFailed("malformed public key PEM".into()))
}

/// Encode raw Ed25519 public key bytes as a PEM block, for `POST /register`.
pub fn raw_public_key_to_pem(public_key: &[u8]) -> String {
    to_pem(PEM_PUBLIC_LABEL, public_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_reload_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let identity = Identity::load_or_generate(dir.path(), "alice").unwrap();
        let pubkey = identity.signing_public_key().to_vec();
        let enc_pubkey = *identity.encryption_public_key().as_bytes();

        let reloaded = Identity::load_or_generate(dir.path(), "alice").unwrap();
        assert_eq!(reloaded.signing_public_key(), pubkey.as_slice());
        assert_eq!(*reloaded.encryption_public_key().as_bytes(), enc_pubkey);
        assert_eq!(reloaded.user_id, "alice");
    }

    #[test]
    fn public_derivation_matches_private_derivation() {
        let identity = Identity::generate("bob").unwrap();
        let derived_public =
            encryption_public_key_from_signing_public_key(identity.signing_public_key()).unwrap();
        assert_eq!(
            derived_public.as_bytes(),
            identity.encryption_public_key().as_bytes(),
            "deriving from the public signing key must match deriving from the private seed"
        );
    }

    #[test]
    fn distinct_identities_have_distinct_keys() {
        let a = Identity::generate("a").unwrap();
        let b = Identity::generate("b").unwrap();
        assert_ne!(a.signing_public_key(), b.signing_public_key());
        assert_ne!(
            a.encryption_public_key().as_bytes(),
            b.encryption_public_key().as_bytes()
        );
    }
}
