//! Wallet signing boundary.
//!
//! The connected identity is modelled as a [`Signer`]: it knows its address
//! and can sign a user-decryption statement. [`LocalWallet`] holds a raw
//! secp256k1 key and produces 65-byte recoverable signatures (`r || s || v`).

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

use crate::authorization::UserDecryptStatement;
use crate::primitives::Address;

/// Errors raised while asking the wallet for a signature.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The user declined the signature request.
    #[error("user rejected the signature request")]
    Rejected,

    /// No signer could be reached.
    #[error("signer unavailable: {0}")]
    Unavailable(String),

    /// The signature bytes were malformed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Underlying secp256k1 error.
    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),
}

/// A 65-byte recoverable ECDSA signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    /// Recovers the address that produced this signature over `digest`.
    ///
    /// # Errors
    /// Returns `WalletError::InvalidSignature` for a bad recovery byte or
    /// `WalletError::Secp256k1` if recovery fails.
    pub fn recover(&self, digest: &[u8; 32]) -> Result<Address, WalletError> {
        let v = self.0[64];
        let rec_id = match v {
            0 | 1 => i32::from(v),
            27 | 28 => i32::from(v - 27),
            other => {
                return Err(WalletError::InvalidSignature(format!(
                    "recovery byte {other}"
                )))
            }
        };
        let rec_id = RecoveryId::from_i32(rec_id)?;
        let sig = RecoverableSignature::from_compact(&self.0[..64], rec_id)?;
        let secp = Secp256k1::verification_only();
        let pk = secp.recover_ecdsa(&Message::from_digest(*digest), &sig)?;
        Ok(Address::from_public_key(&pk))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(de::Error::custom)?;
        let bytes: [u8; 65] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("signature must be 65 bytes"))?;
        Ok(Self(bytes))
    }
}

/// The connected identity.
#[allow(async_fn_in_trait)]
pub trait Signer {
    /// The identity's address.
    fn address(&self) -> Address;

    /// Asks the identity to sign a decryption statement. This may block on
    /// user interaction and may be refused.
    async fn sign_typed_data(&self, statement: &UserDecryptStatement)
        -> Result<Signature, WalletError>;
}

impl<T: Signer> Signer for Rc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_typed_data(
        &self,
        statement: &UserDecryptStatement,
    ) -> Result<Signature, WalletError> {
        (**self).sign_typed_data(statement).await
    }
}

/// An in-process wallet backed by a secp256k1 secret key.
#[derive(Clone)]
pub struct LocalWallet {
    secret: SecretKey,
    address: Address,
}

impl LocalWallet {
    /// Wraps an existing secret key.
    #[must_use]
    pub fn new(secret: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let pk = PublicKey::from_secret_key(&secp, &secret);
        Self {
            secret,
            address: Address::from_public_key(&pk),
        }
    }

    /// Generates a wallet with a random key.
    #[must_use]
    pub fn random() -> Self {
        Self::new(SecretKey::new(&mut rand::thread_rng()))
    }

    /// Signs a raw 32-byte digest.
    #[must_use]
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Signature {
        let secp = Secp256k1::signing_only();
        let sig = secp.sign_ecdsa_recoverable(&Message::from_digest(*digest), &self.secret);
        let (rec_id, compact) = sig.serialize_compact();
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&compact);
        // Ethereum-style recovery byte.
        bytes[64] = 27 + rec_id.to_i32() as u8;
        Signature(bytes)
    }
}

impl fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Signer for LocalWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_typed_data(
        &self,
        statement: &UserDecryptStatement,
    ) -> Result<Signature, WalletError> {
        Ok(self.sign_digest(&statement.digest()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::keccak256;

    #[test]
    fn signature_recovers_signer_address() {
        let wallet = LocalWallet::random();
        let digest = keccak256(&[b"hello"]);
        let sig = wallet.sign_digest(&digest);
        assert_eq!(sig.recover(&digest).unwrap(), wallet.address());
    }

    #[test]
    fn signature_over_other_digest_recovers_other_address() {
        let wallet = LocalWallet::random();
        let sig = wallet.sign_digest(&keccak256(&[b"hello"]));
        let recovered = sig.recover(&keccak256(&[b"goodbye"])).ok();
        assert_ne!(recovered, Some(wallet.address()));
    }

    #[test]
    fn bad_recovery_byte_is_rejected() {
        let wallet = LocalWallet::random();
        let digest = keccak256(&[b"hello"]);
        let mut sig = wallet.sign_digest(&digest);
        sig.0[64] = 5;
        assert!(matches!(
            sig.recover(&digest),
            Err(WalletError::InvalidSignature(_))
        ));
    }

    #[test]
    fn signature_serde_roundtrip() {
        let wallet = LocalWallet::random();
        let sig = wallet.sign_digest(&[7u8; 32]);
        let json = serde_json::to_string(&sig).unwrap();
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(sig, back);
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let wallet = LocalWallet::random();
        let debug = format!("{wallet:?}");
        assert!(debug.contains(&wallet.address().to_string()));
        assert!(!debug.contains(&hex::encode(wallet.secret.secret_bytes())));
    }
}
