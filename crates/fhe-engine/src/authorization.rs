//! User-decryption authorization.
//!
//! A decryption round uses a fresh ephemeral keypair and a typed statement
//! binding that keypair's public key, the contracts in scope and a validity
//! window to the user's identity. The statement is hashed following EIP-712
//! and signed by the user's wallet. Nothing here is cached across rounds.

use rand::thread_rng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::input::hex_bytes;
use crate::primitives::{keccak256, Address, Handle};
use crate::wallet::Signature;
use crate::{FheError, Result};

/// Seconds in one day of authorization validity.
pub const SECONDS_PER_DAY: u64 = 86_400;

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

const STATEMENT_TYPE: &str = "UserDecryptRequestVerification(bytes publicKey,address[] contractAddresses,uint256 startTimestamp,uint256 durationDays)";

fn u256_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// EIP-712 domain of the decryption verifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip712Domain {
    /// Domain name.
    pub name: String,
    /// Domain version.
    pub version: String,
    /// Chain the verifier lives on.
    pub chain_id: u64,
    /// Address of the verifier contract.
    pub verifying_contract: Address,
}

impl Eip712Domain {
    /// The domain separator hash.
    #[must_use]
    pub fn separator(&self) -> [u8; 32] {
        keccak256(&[
            &keccak256(&[DOMAIN_TYPE.as_bytes()]),
            &keccak256(&[self.name.as_bytes()]),
            &keccak256(&[self.version.as_bytes()]),
            &u256_word(self.chain_id),
            &self.verifying_contract.to_word(),
        ])
    }
}

/// The statement a user signs to permit decryption of their handles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDecryptStatement {
    /// Signing domain.
    pub domain: Eip712Domain,
    /// Ephemeral public key the plaintexts are released to.
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    /// Contracts whose handles may be decrypted.
    pub contract_addresses: Vec<Address>,
    /// Unix start of validity.
    pub start_timestamp: u64,
    /// Length of validity in days.
    pub duration_days: u32,
}

impl UserDecryptStatement {
    /// keccak256 of the typed struct.
    #[must_use]
    pub fn struct_hash(&self) -> [u8; 32] {
        let words: Vec<u8> = self
            .contract_addresses
            .iter()
            .flat_map(|a| a.to_word())
            .collect();
        keccak256(&[
            &keccak256(&[STATEMENT_TYPE.as_bytes()]),
            &keccak256(&[&self.public_key]),
            &keccak256(&[&words]),
            &u256_word(self.start_timestamp),
            &u256_word(u64::from(self.duration_days)),
        ])
    }

    /// The 32-byte digest the wallet signs.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        keccak256(&[b"\x19\x01", &self.domain.separator(), &self.struct_hash()])
    }

    /// Unix time at which the statement stops being valid.
    #[must_use]
    pub fn expires_at(&self) -> u64 {
        self.start_timestamp
            .saturating_add(u64::from(self.duration_days).saturating_mul(SECONDS_PER_DAY))
    }

    /// Whether `now` falls inside the validity window.
    #[must_use]
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.duration_days > 0 && self.start_timestamp <= now && now < self.expires_at()
    }
}

/// Ephemeral asymmetric keypair used for exactly one decryption round.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionKeypair {
    /// Compressed secp256k1 public key.
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    /// Raw secret scalar.
    #[serde(with = "hex_bytes")]
    pub private_key: Vec<u8>,
}

impl DecryptionKeypair {
    /// Generates a fresh random keypair.
    #[must_use]
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(&mut thread_rng());
        let pk = PublicKey::from_secret_key(&secp, &sk);
        Self {
            public_key: pk.serialize().to_vec(),
            private_key: sk.secret_bytes().to_vec(),
        }
    }

    /// Checks that the private key matches the public key.
    ///
    /// # Errors
    /// Returns `FheError::Authorization` if either key is malformed or they
    /// do not belong together.
    pub fn verify(&self) -> Result<()> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&self.private_key)
            .map_err(|e| FheError::Authorization(format!("invalid private key: {e}")))?;
        let derived = PublicKey::from_secret_key(&secp, &sk);
        if derived.serialize().as_slice() != self.public_key.as_slice() {
            return Err(FheError::Authorization(
                "keypair halves do not match".to_string(),
            ));
        }
        Ok(())
    }

    /// Hex of the public key.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }
}

impl fmt::Debug for DecryptionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionKeypair")
            .field("public_key", &self.public_key_hex())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A handle together with the contract it is scoped to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleContractPair {
    /// Ciphertext handle.
    pub handle: Handle,
    /// Contract the handle belongs to.
    pub contract_address: Address,
}

/// Everything the engine needs to release plaintexts to a user.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserDecryptRequest {
    /// Handles to resolve.
    pub pairs: Vec<HandleContractPair>,
    /// Ephemeral keypair named in the statement.
    pub keypair: DecryptionKeypair,
    /// User's signature over the statement digest.
    pub signature: Signature,
    /// Contracts named in the statement.
    pub contract_addresses: Vec<Address>,
    /// Identity that signed.
    pub user: Address,
    /// Statement start time.
    pub start_timestamp: u64,
    /// Statement validity in days.
    pub duration_days: u32,
}
