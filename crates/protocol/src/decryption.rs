//! User-decryption rounds.
//!
//! One round decrypts a batch of handles owned by the connected identity:
//! generate an ephemeral keypair, have the identity sign a statement over
//! `{public key, [contract], now, window}`, then ask the engine to resolve
//! every `(handle, contract)` pair. A round is all or nothing.

use fhe_engine::{
    Address, ClearValue, FheEngine, Handle, HandleContractPair, Signer, UserDecryptRequest,
};
use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{ProtocolError, Result, AUTHORIZATION_WINDOW_DAYS};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Decrypts handles scoped to one contract.
#[derive(Debug)]
pub struct DecryptionSession<'a, E> {
    engine: &'a E,
    contract: Address,
}

impl<'a, E: FheEngine> DecryptionSession<'a, E> {
    /// Creates a session for handles of `contract`.
    #[must_use]
    pub fn new(engine: &'a E, contract: Address) -> Self {
        Self { engine, contract }
    }

    /// Resolves every non-zero handle in `handles` to its raw plaintext.
    ///
    /// An empty set (after dropping zero handles) returns an empty map
    /// without asking for a signature, so no wallet is needed for it.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::NotConnected` without a wallet,
    /// `ProtocolError::EngineNotReady` before prompting when the engine is
    /// not initialized, `ProtocolError::Signature` when the signer refuses,
    /// and `ProtocolError::Engine` when any handle cannot be resolved. No
    /// partial result is ever returned.
    pub async fn decrypt<S: Signer>(
        &self,
        wallet: Option<&S>,
        handles: &BTreeSet<Handle>,
    ) -> Result<HashMap<Handle, String>> {
        let pairs: Vec<HandleContractPair> = handles
            .iter()
            .filter(|h| !h.is_zero())
            .map(|&handle| HandleContractPair {
                handle,
                contract_address: self.contract,
            })
            .collect();
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }

        let wallet = wallet.ok_or(ProtocolError::NotConnected)?;
        if !self.engine.is_ready() {
            return Err(ProtocolError::EngineNotReady);
        }

        let keypair = self.engine.generate_keypair();
        let contracts = [self.contract];
        let start_timestamp = unix_now();
        let statement = self.engine.create_authorization(
            &keypair.public_key,
            &contracts,
            start_timestamp,
            AUTHORIZATION_WINDOW_DAYS,
        );

        tracing::debug!(
            user = %wallet.address(),
            handles = pairs.len(),
            "requesting decryption signature"
        );
        let signature = match wallet.sign_typed_data(&statement).await {
            Ok(sig) => sig,
            Err(e) => {
                tracing::warn!(error = %e, "decryption round aborted by signer");
                return Err(e.into());
            }
        };

        let request = UserDecryptRequest {
            pairs,
            keypair,
            signature,
            contract_addresses: contracts.to_vec(),
            user: wallet.address(),
            start_timestamp,
            duration_days: AUTHORIZATION_WINDOW_DAYS,
        };
        let values = self.engine.user_decrypt(&request).await?;
        tracing::debug!(resolved = values.len(), "decryption round finished");
        Ok(values)
    }

    /// Like [`decrypt`](Self::decrypt), decoding each plaintext by its
    /// handle's type.
    ///
    /// # Errors
    /// As `decrypt`, plus `ProtocolError::Engine` for a plaintext that does
    /// not decode. Decoding failures also fail the whole round.
    pub async fn decrypt_values<S: Signer>(
        &self,
        wallet: Option<&S>,
        handles: &BTreeSet<Handle>,
    ) -> Result<HashMap<Handle, ClearValue>> {
        let raw = self.decrypt(wallet, handles).await?;
        let mut values = HashMap::with_capacity(raw.len());
        for (handle, text) in raw {
            values.insert(handle, ClearValue::decode(&handle, &text)?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhe_engine::{
        FheError, FheType, LocalWallet, MockCoprocessor, Signature, UserDecryptStatement,
        WalletError,
    };
    use std::cell::Cell;

    const CONTRACT: Address = Address([0x11; 20]);

    struct Refusing(Address);

    impl Signer for Refusing {
        fn address(&self) -> Address {
            self.0
        }

        async fn sign_typed_data(
            &self,
            _statement: &UserDecryptStatement,
        ) -> std::result::Result<Signature, WalletError> {
            Err(WalletError::Rejected)
        }
    }

    struct Counting {
        inner: LocalWallet,
        prompts: Cell<usize>,
    }

    impl Signer for Counting {
        fn address(&self) -> Address {
            self.inner.address()
        }

        async fn sign_typed_data(
            &self,
            statement: &UserDecryptStatement,
        ) -> std::result::Result<Signature, WalletError> {
            self.prompts.set(self.prompts.get() + 1);
            self.inner.sign_typed_data(statement).await
        }
    }

    /// Stores `value` under `CONTRACT` and shares it with `user`.
    fn owned(engine: &MockCoprocessor, user: Address, value: u64, ty: FheType) -> Handle {
        let scope = engine.scope(CONTRACT);
        let handle = scope.trivial(value, ty).unwrap();
        scope.allow(handle, user).unwrap();
        handle
    }

    fn counting() -> Counting {
        Counting {
            inner: LocalWallet::random(),
            prompts: Cell::new(0),
        }
    }

    #[tokio::test]
    async fn empty_set_needs_no_signature() {
        let engine = MockCoprocessor::new();
        let session = DecryptionSession::new(&engine, CONTRACT);
        let wallet = counting();

        let out = session.decrypt(Some(&wallet), &BTreeSet::new()).await.unwrap();
        assert!(out.is_empty());
        let zero_only = BTreeSet::from([Handle::ZERO]);
        let out = session.decrypt(Some(&wallet), &zero_only).await.unwrap();
        assert!(out.is_empty(), "zero handles are never requested");
        assert_eq!(wallet.prompts.get(), 0);

        let none: Option<&LocalWallet> = None;
        assert!(session.decrypt(none, &BTreeSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn decrypts_and_decodes_owned_handles() {
        let engine = MockCoprocessor::new();
        let wallet = counting();
        let score = owned(&engine, wallet.address(), 150, FheType::Uint32);
        let correct = owned(&engine, wallet.address(), 1, FheType::Bool);
        let wrong = owned(&engine, wallet.address(), 0, FheType::Bool);
        let session = DecryptionSession::new(&engine, CONTRACT);

        let values = session
            .decrypt_values(Some(&wallet), &BTreeSet::from([score, correct, wrong]))
            .await
            .expect("round should succeed");
        assert_eq!(values[&score], ClearValue::Uint(150));
        assert_eq!(values[&correct], ClearValue::Bool(true));
        assert_eq!(values[&wrong], ClearValue::Bool(false));
        assert_eq!(wallet.prompts.get(), 1, "one signature covers the batch");
    }

    #[tokio::test]
    async fn refusal_fails_the_round() {
        let engine = MockCoprocessor::new();
        let signer = Refusing(Address([0xa1; 20]));
        let handle = owned(&engine, signer.0, 5, FheType::Uint8);
        let session = DecryptionSession::new(&engine, CONTRACT);

        let err = session
            .decrypt(Some(&signer), &BTreeSet::from([handle]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Signature(WalletError::Rejected)
        ));
    }

    #[tokio::test]
    async fn missing_wallet_fails_non_empty_round() {
        let engine = MockCoprocessor::new();
        let handle = owned(&engine, Address([0xa1; 20]), 5, FheType::Uint8);
        let session = DecryptionSession::new(&engine, CONTRACT);
        let none: Option<&LocalWallet> = None;

        let err = session
            .decrypt(none, &BTreeSet::from([handle]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NotConnected));
    }

    #[tokio::test]
    async fn foreign_handle_fails_the_whole_round() {
        let engine = MockCoprocessor::new();
        let wallet = counting();
        let mine = owned(&engine, wallet.address(), 1, FheType::Bool);
        let other_scope = engine.scope(Address([0x22; 20]));
        let foreign = other_scope.trivial(9, FheType::Uint32).unwrap();
        other_scope.allow(foreign, wallet.address()).unwrap();
        let session = DecryptionSession::new(&engine, CONTRACT);

        let err = session
            .decrypt(Some(&wallet), &BTreeSet::from([mine, foreign]))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProtocolError::Engine(FheError::OutOfScope { .. })),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn not_ready_engine_is_refused_before_prompting() {
        let engine = MockCoprocessor::new();
        let wallet = counting();
        let handle = owned(&engine, wallet.address(), 1, FheType::Bool);
        engine.set_ready(false);
        let session = DecryptionSession::new(&engine, CONTRACT);

        let err = session
            .decrypt(Some(&wallet), &BTreeSet::from([handle]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::EngineNotReady));
        assert_eq!(wallet.prompts.get(), 0);
    }
}
