//! Encrypted quiz protocol orchestration.
//!
//! Coordinates the player-side workflow: encrypt a choice, submit it once
//! per question, read back encrypted state, and decrypt the player's own
//! score and results through a signed user-decryption round.

pub mod controller;
pub mod decryption;
pub mod reader;
pub mod submission;
pub mod types;

use cipherquiz_ledger::LedgerError;
use fhe_engine::{FheError, WalletError};
use thiserror::Error;

/// Validity of a user-decryption authorization, in days.
pub const AUTHORIZATION_WINDOW_DAYS: u32 = 7;

/// Errors that can occur during protocol execution.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No identity is connected.
    #[error("connect a wallet first")]
    NotConnected,

    /// The encryption engine has not finished initializing.
    #[error("encryption service is not ready yet")]
    EngineNotReady,

    /// Option index outside {0, 1}.
    #[error("invalid option {0}: expected 0 or 1")]
    InvalidOption(u8),

    /// Question id outside the catalog.
    #[error("unknown question {0}")]
    UnknownQuestion(u64),

    /// Submit was requested before an option was selected.
    #[error("select an option for question {0} before submitting")]
    NoOptionSelected(u64),

    /// A submission for this question is already in flight.
    #[error("an answer for question {0} is already being submitted")]
    SubmissionInFlight(u64),

    /// The question was already answered by this identity. Carries the
    /// contract's revert reason verbatim.
    #[error("{reason}")]
    AlreadyAnswered {
        /// Question id.
        question: u64,
        /// Revert reason.
        reason: String,
    },

    /// The write failed for any other reason.
    #[error("failed to submit encrypted answer: {0}")]
    SubmissionFailed(String),

    /// The wallet refused or could not sign.
    #[error("signature request failed: {0}")]
    Signature(#[from] WalletError),

    /// Encryption engine error.
    #[error("encryption engine error: {0}")]
    Engine(FheError),

    /// Ledger read error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<FheError> for ProtocolError {
    fn from(err: FheError) -> Self {
        match err {
            FheError::NotReady => Self::EngineNotReady,
            other => Self::Engine(other),
        }
    }
}

impl ProtocolError {
    /// Whether the error was raised before any network call was made.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::EngineNotReady
                | Self::InvalidOption(_)
                | Self::UnknownQuestion(_)
                | Self::NoOptionSelected(_)
                | Self::SubmissionInFlight(_)
        )
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
