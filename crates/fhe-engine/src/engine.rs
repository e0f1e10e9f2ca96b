//! The encryption-engine boundary.

use std::collections::HashMap;
use std::rc::Rc;

use crate::authorization::{DecryptionKeypair, UserDecryptRequest, UserDecryptStatement};
use crate::input::{EncryptedInput, InputBuilder, InputValue};
use crate::primitives::{Address, Handle};
use crate::Result;

/// Operations the client needs from an FHE coprocessor SDK.
///
/// Futures returned by this trait are not required to be `Send`; callers
/// drive them on a single-threaded runtime.
#[allow(async_fn_in_trait)]
pub trait FheEngine {
    /// Whether initialization (key download, wasm load, ...) has finished.
    fn is_ready(&self) -> bool;

    /// Encrypts `values` for `contract`, to be submitted by `user`.
    async fn encrypt(
        &self,
        contract: Address,
        user: Address,
        values: &[InputValue],
    ) -> Result<EncryptedInput>;

    /// Generates a fresh ephemeral keypair for one decryption round.
    fn generate_keypair(&self) -> DecryptionKeypair;

    /// Builds the statement the user must sign to authorize decryption.
    fn create_authorization(
        &self,
        public_key: &[u8],
        contracts: &[Address],
        start_timestamp: u64,
        duration_days: u32,
    ) -> UserDecryptStatement;

    /// Resolves every handle in the request to its plaintext string.
    ///
    /// Either every pair resolves or the whole request fails.
    async fn user_decrypt(&self, request: &UserDecryptRequest) -> Result<HashMap<Handle, String>>;

    /// Starts an encrypted input scoped to (`contract`, `user`).
    fn create_encrypted_input(&self, contract: Address, user: Address) -> InputBuilder<'_, Self>
    where
        Self: Sized,
    {
        InputBuilder::new(self, contract, user)
    }
}

impl<T: FheEngine> FheEngine for Rc<T> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    async fn encrypt(
        &self,
        contract: Address,
        user: Address,
        values: &[InputValue],
    ) -> Result<EncryptedInput> {
        (**self).encrypt(contract, user, values).await
    }

    fn generate_keypair(&self) -> DecryptionKeypair {
        (**self).generate_keypair()
    }

    fn create_authorization(
        &self,
        public_key: &[u8],
        contracts: &[Address],
        start_timestamp: u64,
        duration_days: u32,
    ) -> UserDecryptStatement {
        (**self).create_authorization(public_key, contracts, start_timestamp, duration_days)
    }

    async fn user_decrypt(&self, request: &UserDecryptRequest) -> Result<HashMap<Handle, String>> {
        (**self).user_decrypt(request).await
    }
}
