//! In-process stand-in for an FHE coprocessor.
//!
//! Values are kept in clear behind their handles, so this is for local
//! development and tests only. It reproduces the behaviour a client can
//! observe from a real coprocessor: handle layout, contract scoping, an
//! access-control list, input proofs bound to (contract, user), and
//! signature-checked user decryption with a validity window.

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::authorization::{
    DecryptionKeypair, Eip712Domain, UserDecryptRequest, UserDecryptStatement,
};
use crate::engine::FheEngine;
use crate::input::{hex_bytes, EncryptedInput, InputValue};
use crate::primitives::{keccak256, Address, FheType, Handle};
use crate::{FheError, Result};

/// Chain id of the local development network.
pub const DEFAULT_CHAIN_ID: u64 = 31337;

/// Longest validity window the engine accepts, in days.
pub const MAX_AUTHORIZATION_DAYS: u32 = 365;

/// Handle index byte used for computed (non-input) handles.
const COMPUTED_INDEX: u8 = 0xff;

const MAC_LEN: usize = 32;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn label_address(label: &[u8]) -> Address {
    let digest = keccak256(&[label]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    Address(bytes)
}

/// Static parameters of a mock coprocessor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoprocessorConfig {
    /// Chain id stamped into handles and the signing domain.
    pub chain_id: u64,
    /// Address of the decryption verifier used as EIP-712 verifying contract.
    pub verifier: Address,
    /// Key used to authenticate input proofs.
    #[serde(with = "hex_bytes")]
    pub proof_key: Vec<u8>,
}

impl Default for CoprocessorConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            verifier: label_address(b"cipherquiz/decryption-verifier"),
            proof_key: keccak256(&[b"cipherquiz/input-verifier"]).to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct StoredValue {
    ty: FheType,
    value: u64,
    contract: Address,
}

/// Mutable state: plaintexts, scopes and the ACL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoprocessorState {
    nonce: u64,
    values: BTreeMap<Handle, StoredValue>,
    acl: BTreeMap<Handle, BTreeSet<Address>>,
}

/// Persistable image of a [`MockCoprocessor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoprocessorSnapshot {
    /// Static parameters.
    pub config: CoprocessorConfig,
    /// Stored values and permissions.
    pub state: CoprocessorState,
}

/// In-process FHE coprocessor.
#[derive(Debug)]
pub struct MockCoprocessor {
    config: CoprocessorConfig,
    ready: Cell<bool>,
    state: RefCell<CoprocessorState>,
}

impl Default for MockCoprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCoprocessor {
    /// A ready coprocessor with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CoprocessorConfig::default())
    }

    /// A ready coprocessor with a custom configuration.
    #[must_use]
    pub fn with_config(config: CoprocessorConfig) -> Self {
        Self {
            config,
            ready: Cell::new(true),
            state: RefCell::new(CoprocessorState::default()),
        }
    }

    /// A coprocessor that has not finished initializing.
    #[must_use]
    pub fn uninitialized() -> Self {
        let engine = Self::new();
        engine.ready.set(false);
        engine
    }

    /// Restores a coprocessor from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: CoprocessorSnapshot) -> Self {
        Self {
            config: snapshot.config,
            ready: Cell::new(true),
            state: RefCell::new(snapshot.state),
        }
    }

    /// Captures config and state.
    #[must_use]
    pub fn snapshot(&self) -> CoprocessorSnapshot {
        CoprocessorSnapshot {
            config: self.config.clone(),
            state: self.state.borrow().clone(),
        }
    }

    /// Marks initialization as finished (or not).
    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }

    /// Number of handles the engine knows about.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.state.borrow().values.len()
    }

    /// Reads a plaintext directly, bypassing the ACL. Debugging aid only.
    #[must_use]
    pub fn plaintext(&self, handle: &Handle) -> Option<u64> {
        self.state.borrow().values.get(handle).map(|v| v.value)
    }

    /// Whether `account` may use `handle`.
    #[must_use]
    pub fn is_allowed(&self, handle: &Handle, account: &Address) -> bool {
        self.state
            .borrow()
            .acl
            .get(handle)
            .is_some_and(|set| set.contains(account))
    }

    /// Contract-side operations executed on behalf of `contract`.
    #[must_use]
    pub fn scope(&self, contract: Address) -> ExecutionScope<'_> {
        ExecutionScope {
            engine: self,
            contract,
        }
    }

    fn domain(&self) -> Eip712Domain {
        Eip712Domain {
            name: "Decryption".to_string(),
            version: "1".to_string(),
            chain_id: self.config.chain_id,
            verifying_contract: self.config.verifier,
        }
    }

    fn proof_mac(&self, contract: &Address, user: &Address, handles: &[Handle]) -> [u8; 32] {
        let joined: Vec<u8> = handles.iter().flat_map(|h| h.0).collect();
        keccak256(&[&self.config.proof_key, &contract.0, &user.0, &joined])
    }

    fn store(&self, handle: Handle, ty: FheType, value: u64, contract: Address) {
        self.state.borrow_mut().values.insert(
            handle,
            StoredValue {
                ty,
                value,
                contract,
            },
        );
    }

    fn next_digest(&self, parts: &[&[u8]]) -> [u8; 32] {
        let mut state = self.state.borrow_mut();
        state.nonce += 1;
        let nonce = state.nonce.to_be_bytes();
        let mut all: Vec<&[u8]> = parts.to_vec();
        all.push(&nonce);
        keccak256(&all)
    }

    fn grant(&self, handle: Handle, account: Address) {
        self.state
            .borrow_mut()
            .acl
            .entry(handle)
            .or_default()
            .insert(account);
    }

    fn resolve(&self, pair_handle: &Handle, contract: &Address, user: &Address) -> Result<String> {
        let state = self.state.borrow();
        let stored = state
            .values
            .get(pair_handle)
            .ok_or(FheError::UnknownHandle(*pair_handle))?;
        if stored.contract != *contract {
            return Err(FheError::OutOfScope {
                handle: *pair_handle,
                contract: *contract,
            });
        }
        let allowed = state.acl.get(pair_handle);
        for account in [user, contract] {
            if !allowed.is_some_and(|set| set.contains(account)) {
                return Err(FheError::NotAllowed {
                    handle: *pair_handle,
                    account: *account,
                });
            }
        }
        Ok(match stored.ty {
            FheType::Bool if stored.value == 1 => "1".to_string(),
            FheType::Bool => "0".to_string(),
            _ => stored.value.to_string(),
        })
    }
}

impl FheEngine for MockCoprocessor {
    fn is_ready(&self) -> bool {
        self.ready.get()
    }

    async fn encrypt(
        &self,
        contract: Address,
        user: Address,
        values: &[InputValue],
    ) -> Result<EncryptedInput> {
        if !self.is_ready() {
            return Err(FheError::NotReady);
        }
        if values.is_empty() {
            return Err(FheError::EmptyInput);
        }
        let count = u8::try_from(values.len())
            .map_err(|_| FheError::InvalidEncoding("too many values in one input".into()))?;

        let mut handles = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            value.validate()?;
            let digest = self.next_digest(&[b"input", &contract.0, &user.0]);
            let handle = Handle::compose(&digest, index as u8, self.config.chain_id, value.ty);
            self.store(handle, value.ty, value.value, contract);
            handles.push(handle);
        }

        let mut proof = Vec::with_capacity(1 + handles.len() * 32 + MAC_LEN);
        proof.push(count);
        for handle in &handles {
            proof.extend_from_slice(&handle.0);
        }
        proof.extend_from_slice(&self.proof_mac(&contract, &user, &handles));

        tracing::debug!(%contract, %user, count, "mock coprocessor encrypted input");
        Ok(EncryptedInput { handles, proof })
    }

    fn generate_keypair(&self) -> DecryptionKeypair {
        DecryptionKeypair::generate()
    }

    fn create_authorization(
        &self,
        public_key: &[u8],
        contracts: &[Address],
        start_timestamp: u64,
        duration_days: u32,
    ) -> UserDecryptStatement {
        UserDecryptStatement {
            domain: self.domain(),
            public_key: public_key.to_vec(),
            contract_addresses: contracts.to_vec(),
            start_timestamp,
            duration_days,
        }
    }

    async fn user_decrypt(&self, request: &UserDecryptRequest) -> Result<HashMap<Handle, String>> {
        if !self.is_ready() {
            return Err(FheError::NotReady);
        }
        if request.contract_addresses.is_empty() {
            return Err(FheError::Authorization("no contract in scope".into()));
        }
        if request.duration_days > MAX_AUTHORIZATION_DAYS {
            return Err(FheError::Authorization(format!(
                "validity of {} days exceeds {MAX_AUTHORIZATION_DAYS}",
                request.duration_days
            )));
        }

        let statement = self.create_authorization(
            &request.keypair.public_key,
            &request.contract_addresses,
            request.start_timestamp,
            request.duration_days,
        );
        if !statement.is_valid_at(unix_now()) {
            return Err(FheError::Authorization(
                "outside the authorized validity window".into(),
            ));
        }
        request.keypair.verify()?;

        let signer = request
            .signature
            .recover(&statement.digest())
            .map_err(|e| FheError::Authorization(e.to_string()))?;
        if signer != request.user {
            return Err(FheError::Authorization(format!(
                "statement signed by {signer}, not {}",
                request.user
            )));
        }

        let mut out = HashMap::with_capacity(request.pairs.len());
        for pair in &request.pairs {
            if !request.contract_addresses.contains(&pair.contract_address) {
                return Err(FheError::OutOfScope {
                    handle: pair.handle,
                    contract: pair.contract_address,
                });
            }
            let raw = self.resolve(&pair.handle, &pair.contract_address, &request.user)?;
            out.insert(pair.handle, raw);
        }
        tracing::debug!(user = %request.user, count = out.len(), "mock coprocessor user decryption");
        Ok(out)
    }
}

/// Homomorphic operations as executed by one contract.
///
/// Every handle produced here is scoped to the executing contract, which is
/// automatically granted access to it. Operands must already be accessible
/// to the contract.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionScope<'a> {
    engine: &'a MockCoprocessor,
    contract: Address,
}

impl ExecutionScope<'_> {
    fn operand(&self, handle: &Handle) -> Result<StoredValue> {
        if !self.engine.is_allowed(handle, &self.contract) {
            return Err(FheError::NotAllowed {
                handle: *handle,
                account: self.contract,
            });
        }
        self.engine
            .state
            .borrow()
            .values
            .get(handle)
            .cloned()
            .ok_or(FheError::UnknownHandle(*handle))
    }

    fn produce(&self, op: &[u8], operands: &[Handle], ty: FheType, value: u64) -> Handle {
        let joined: Vec<u8> = operands.iter().flat_map(|h| h.0).collect();
        let digest = self
            .engine
            .next_digest(&[op, &joined, &self.contract.0]);
        let handle = Handle::compose(&digest, COMPUTED_INDEX, self.engine.config.chain_id, ty);
        self.engine.store(handle, ty, value, self.contract);
        self.engine.grant(handle, self.contract);
        handle
    }

    /// Verifies an external input and makes it usable by this contract.
    ///
    /// # Errors
    /// Returns `FheError::InvalidProof` if the proof is malformed, was issued
    /// for another (contract, user) pair, or does not cover `handle`.
    pub fn verify_input(&self, handle: Handle, proof: &[u8], user: Address) -> Result<Handle> {
        let (&count, rest) = proof
            .split_first()
            .ok_or_else(|| FheError::InvalidProof("empty proof".into()))?;
        let count = usize::from(count);
        if rest.len() != count * 32 + MAC_LEN {
            return Err(FheError::InvalidProof("truncated proof".into()));
        }
        let (listed, mac) = rest.split_at(count * 32);
        let handles: Vec<Handle> = listed
            .chunks_exact(32)
            .map(|c| {
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(c);
                Handle(bytes)
            })
            .collect();
        if mac != self.engine.proof_mac(&self.contract, &user, &handles).as_slice() {
            return Err(FheError::InvalidProof(
                "proof not issued for this contract and user".into(),
            ));
        }
        if !handles.contains(&handle) {
            return Err(FheError::InvalidProof("handle not covered by proof".into()));
        }
        let stored = self
            .engine
            .state
            .borrow()
            .values
            .get(&handle)
            .cloned()
            .ok_or(FheError::UnknownHandle(handle))?;
        if stored.contract != self.contract {
            return Err(FheError::OutOfScope {
                handle,
                contract: self.contract,
            });
        }
        self.engine.grant(handle, self.contract);
        Ok(handle)
    }

    /// Encrypts a public constant.
    ///
    /// # Errors
    /// Returns `FheError::ValueOutOfRange` if `value` does not fit `ty`.
    pub fn trivial(&self, value: u64, ty: FheType) -> Result<Handle> {
        InputValue { value, ty }.validate()?;
        Ok(self.produce(b"trivial", &[], ty, value))
    }

    /// Encrypted equality.
    ///
    /// # Errors
    /// Returns `FheError::TypeMismatch` for operands of different types, or
    /// an access error.
    pub fn eq(&self, a: Handle, b: Handle) -> Result<Handle> {
        let (lhs, rhs) = (self.operand(&a)?, self.operand(&b)?);
        if lhs.ty != rhs.ty {
            return Err(FheError::TypeMismatch {
                expected: lhs.ty,
                found: rhs.ty,
            });
        }
        Ok(self.produce(b"eq", &[a, b], FheType::Bool, u64::from(lhs.value == rhs.value)))
    }

    /// Encrypted `if cond { a } else { b }`.
    ///
    /// # Errors
    /// Returns `FheError::TypeMismatch` if `cond` is not boolean or the
    /// branches differ in type, or an access error.
    pub fn select(&self, cond: Handle, a: Handle, b: Handle) -> Result<Handle> {
        let c = self.operand(&cond)?;
        if c.ty != FheType::Bool {
            return Err(FheError::TypeMismatch {
                expected: FheType::Bool,
                found: c.ty,
            });
        }
        let (lhs, rhs) = (self.operand(&a)?, self.operand(&b)?);
        if lhs.ty != rhs.ty {
            return Err(FheError::TypeMismatch {
                expected: lhs.ty,
                found: rhs.ty,
            });
        }
        let value = if c.value == 1 { lhs.value } else { rhs.value };
        Ok(self.produce(b"select", &[cond, a, b], lhs.ty, value))
    }

    /// Encrypted addition, wrapping at the type's width.
    ///
    /// # Errors
    /// Returns `FheError::TypeMismatch` for operands of different types, or
    /// an access error.
    pub fn add(&self, a: Handle, b: Handle) -> Result<Handle> {
        let (lhs, rhs) = (self.operand(&a)?, self.operand(&b)?);
        if lhs.ty != rhs.ty {
            return Err(FheError::TypeMismatch {
                expected: lhs.ty,
                found: rhs.ty,
            });
        }
        let value = lhs.value.wrapping_add(rhs.value) & lhs.ty.max_value();
        Ok(self.produce(b"add", &[a, b], lhs.ty, value))
    }

    /// Grants `account` access to a handle this contract can already use.
    ///
    /// # Errors
    /// Returns `FheError::NotAllowed` if this contract cannot use `handle`.
    pub fn allow(&self, handle: Handle, account: Address) -> Result<()> {
        self.operand(&handle)?;
        self.engine.grant(handle, account);
        Ok(())
    }
}
