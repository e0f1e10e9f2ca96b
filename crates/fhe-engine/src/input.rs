//! Encrypted-input construction.
//!
//! An encrypted input turns one or more plaintexts into ciphertext handles
//! plus a single proof covering the batch, bound to one contract and one
//! submitter. The input is single-use: it is passed once as transaction
//! arguments and then dropped.

use serde::{Deserialize, Serialize};

use crate::engine::FheEngine;
use crate::primitives::{Address, FheType, Handle};
use crate::{FheError, Result};

/// A plaintext with its declared FHE type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputValue {
    /// The plaintext.
    pub value: u64,
    /// The declared type (and therefore bit-width).
    pub ty: FheType,
}

impl InputValue {
    /// Checks the plaintext fits the declared width.
    ///
    /// # Errors
    /// Returns `FheError::ValueOutOfRange` if it does not.
    pub fn validate(&self) -> Result<()> {
        if self.value > self.ty.max_value() {
            return Err(FheError::ValueOutOfRange {
                value: self.value,
                ty: self.ty,
            });
        }
        Ok(())
    }
}

/// Handles plus the proof that accompanies them on-chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    /// One handle per value, in insertion order.
    pub handles: Vec<Handle>,
    /// Proof of well-formedness covering every handle.
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
}

/// Accumulates plaintexts for one (contract, submitter) scope.
///
/// Obtained from [`FheEngine::create_encrypted_input`].
#[derive(Debug)]
pub struct InputBuilder<'a, E> {
    engine: &'a E,
    contract: Address,
    user: Address,
    values: Vec<InputValue>,
}

impl<'a, E: FheEngine> InputBuilder<'a, E> {
    pub(crate) fn new(engine: &'a E, contract: Address, user: Address) -> Self {
        Self {
            engine,
            contract,
            user,
            values: Vec::new(),
        }
    }

    fn push(&mut self, value: u64, ty: FheType) -> &mut Self {
        self.values.push(InputValue { value, ty });
        self
    }

    /// Adds a boolean.
    pub fn add_bool(&mut self, value: bool) -> &mut Self {
        self.push(u64::from(value), FheType::Bool)
    }

    /// Adds an 8-bit value.
    pub fn add8(&mut self, value: u8) -> &mut Self {
        self.push(u64::from(value), FheType::Uint8)
    }

    /// Adds a 16-bit value.
    pub fn add16(&mut self, value: u16) -> &mut Self {
        self.push(u64::from(value), FheType::Uint16)
    }

    /// Adds a 32-bit value.
    pub fn add32(&mut self, value: u32) -> &mut Self {
        self.push(u64::from(value), FheType::Uint32)
    }

    /// Adds a 64-bit value.
    pub fn add64(&mut self, value: u64) -> &mut Self {
        self.push(value, FheType::Uint64)
    }

    /// Values queued so far.
    #[must_use]
    pub fn values(&self) -> &[InputValue] {
        &self.values
    }

    /// Encrypts the batch.
    ///
    /// Fails fast, without calling into the engine, when the engine is not
    /// ready or the batch is empty.
    ///
    /// # Errors
    /// Returns `FheError::NotReady`, `FheError::EmptyInput`,
    /// `FheError::ValueOutOfRange`, or whatever the engine reports.
    pub async fn encrypt(&self) -> Result<EncryptedInput> {
        if !self.engine.is_ready() {
            return Err(FheError::NotReady);
        }
        if self.values.is_empty() {
            return Err(FheError::EmptyInput);
        }
        for value in &self.values {
            value.validate()?;
        }
        tracing::debug!(
            contract = %self.contract,
            user = %self.user,
            count = self.values.len(),
            "encrypting input batch"
        );
        self.engine
            .encrypt(self.contract, self.user, &self.values)
            .await
    }
}

pub(crate) mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(de::Error::custom)
    }
}
