//! Identity, signing, and message-sealing primitives for the knowledge
//! exchange node (spec.md C1 Key & Identity, C2 Crypto Envelope).

pub mod envelope;
pub mod error;
pub mod identity;

pub use envelope::{decrypt, encrypt, sign, verify, EncryptedEnvelope, SignedMessage};
pub use error::{CryptoError, CryptoResult};
pub use identity::{encryption_public_key_from_signing_public_key, verify_with_public_key, Identity};
