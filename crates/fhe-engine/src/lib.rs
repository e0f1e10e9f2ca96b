//! Client-side plumbing for an FHE coprocessor.
//!
//! Ciphertext handles, encrypted-input construction, EIP-712 style
//! user-decryption authorizations, wallet signing, clear-value decoding,
//! and an in-process mock coprocessor for local development and tests.

pub mod authorization;
pub mod decode;
pub mod engine;
pub mod input;
pub mod mock;
pub mod primitives;
pub mod wallet;

pub use authorization::{DecryptionKeypair, HandleContractPair, UserDecryptRequest, UserDecryptStatement};
pub use decode::{ClearValue, TRUE_ENCODING};
pub use engine::FheEngine;
pub use input::{EncryptedInput, InputBuilder, InputValue};
pub use mock::{CoprocessorConfig, MockCoprocessor};
pub use primitives::{keccak256, Address, FheType, Handle};
pub use wallet::{LocalWallet, Signature, Signer, WalletError};

use thiserror::Error;

/// Errors raised by the encryption engine boundary.
#[derive(Debug, Error)]
pub enum FheError {
    /// The engine has not finished initializing.
    #[error("encryption service is not ready")]
    NotReady,

    /// An encrypted input was requested with no values.
    #[error("encrypted input has no values")]
    EmptyInput,

    /// A plaintext does not fit the declared bit-width.
    #[error("value {value} does not fit {ty}")]
    ValueOutOfRange {
        /// The rejected plaintext.
        value: u64,
        /// The declared type.
        ty: FheType,
    },

    /// Malformed hex, wrong length, or an unknown type tag.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Input proof did not verify against the claimed handle and scope.
    #[error("invalid input proof: {0}")]
    InvalidProof(String),

    /// The engine holds no value for this handle.
    #[error("unknown handle {0}")]
    UnknownHandle(Handle),

    /// A handle was requested under a contract it is not scoped to.
    #[error("handle {handle} is not scoped to contract {contract}")]
    OutOfScope {
        /// The offending handle.
        handle: Handle,
        /// The contract the request named.
        contract: Address,
    },

    /// The ACL does not grant `account` access to `handle`.
    #[error("{account} is not allowed to access {handle}")]
    NotAllowed {
        /// The handle.
        handle: Handle,
        /// The account lacking permission.
        account: Address,
    },

    /// The user-decryption authorization was rejected.
    #[error("authorization rejected: {0}")]
    Authorization(String),

    /// Two operands of a homomorphic operation have incompatible types.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Type the operation required.
        expected: FheType,
        /// Type that was supplied.
        found: FheType,
    },

    /// A plaintext string returned by the engine could not be decoded.
    #[error("cannot decode {raw:?} as {ty}")]
    Decode {
        /// The raw engine output.
        raw: String,
        /// The handle's declared type.
        ty: FheType,
    },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, FheError>;
