//! The quiz contract as seen from a client.
//!
//! Defines the read/write interface of the encrypted quiz contract, an
//! in-memory implementation executing against the mock coprocessor, and a
//! JSON-persisted local devnet for the CLI.

pub mod devnet;
pub mod local;
pub mod questions;

use fhe_engine::{Address, Handle};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Revert reason for a second answer to the same question.
pub const ALREADY_ANSWERED: &str = "Question already answered";

/// Revert reason for an out-of-range question id.
pub const INVALID_QUESTION: &str = "Invalid question";

/// Errors that can occur talking to the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The contract rejected a repeated answer.
    #[error("Question already answered")]
    AlreadyAnswered,

    /// Any other contract revert.
    #[error("execution reverted: {0}")]
    Reverted(String),

    /// No receipt is known for this transaction.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxHash),

    /// The ledger could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// Devnet state could not be read or written.
    #[error("devnet state I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Devnet state is not valid JSON.
    #[error("devnet state is malformed: {0}")]
    Json(#[from] serde_json::Error),

    /// A development key could not be derived.
    #[error("key derivation failed: {0}")]
    Key(#[from] secp256k1::Error),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// A quiz question. Fixed at deploy time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Position in the catalog, `0..N`.
    pub id: u64,
    /// Prompt text.
    pub prompt: String,
    /// Exactly two option labels.
    pub options: [String; 2],
    /// Points added to the score for a correct answer.
    pub reward: u32,
}

/// A 32-byte transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("transaction hash must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

/// Final status of an included transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Executed successfully.
    Success,
    /// Included but reverted.
    Reverted(String),
}

/// Emitted on every accepted answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmitted {
    /// Answering player.
    pub player: Address,
    /// Answered question.
    pub question_id: u64,
    /// Encrypted correctness flag.
    pub is_correct: Handle,
    /// Encrypted running score after this answer.
    pub new_score: Handle,
}

/// Receipt of an included transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash.
    pub hash: TxHash,
    /// Sender.
    pub from: Address,
    /// Inclusion block.
    pub block_number: u64,
    /// Execution outcome.
    pub status: TxStatus,
    /// Events emitted by the transaction.
    pub events: Vec<AnswerSubmitted>,
}

/// Read and write access to a deployed quiz contract.
///
/// Reads are pure. `submit_answer` returns once the transaction has been
/// accepted for inclusion; `wait_for_receipt` resolves once it is included.
/// A repeated answer is rejected with [`LedgerError::AlreadyAnswered`].
#[allow(async_fn_in_trait)]
pub trait QuizLedger {
    /// Address of the quiz contract.
    fn contract_address(&self) -> Address;

    /// Number of questions in the catalog.
    async fn total_questions(&self) -> Result<u64>;

    /// Metadata of one question.
    async fn get_question(&self, id: u64) -> Result<Question>;

    /// Whether `player` has answered question `id`.
    async fn has_answered(&self, player: Address, id: u64) -> Result<bool>;

    /// Encrypted correctness of `player`'s answer; zero handle if unanswered.
    async fn get_encrypted_result(&self, player: Address, id: u64) -> Result<Handle>;

    /// Encrypted score of `player`; zero handle if nothing was answered.
    async fn get_encrypted_score(&self, player: Address) -> Result<Handle>;

    /// Sends `submitAnswer(id, handle, proof)` from `from`.
    async fn submit_answer(
        &self,
        from: Address,
        id: u64,
        handle: Handle,
        proof: &[u8],
    ) -> Result<TxHash>;

    /// Waits for inclusion of `tx`.
    async fn wait_for_receipt(&self, tx: &TxHash) -> Result<TxReceipt>;
}

impl<T: QuizLedger> QuizLedger for Rc<T> {
    fn contract_address(&self) -> Address {
        (**self).contract_address()
    }

    async fn total_questions(&self) -> Result<u64> {
        (**self).total_questions().await
    }

    async fn get_question(&self, id: u64) -> Result<Question> {
        (**self).get_question(id).await
    }

    async fn has_answered(&self, player: Address, id: u64) -> Result<bool> {
        (**self).has_answered(player, id).await
    }

    async fn get_encrypted_result(&self, player: Address, id: u64) -> Result<Handle> {
        (**self).get_encrypted_result(player, id).await
    }

    async fn get_encrypted_score(&self, player: Address) -> Result<Handle> {
        (**self).get_encrypted_score(player).await
    }

    async fn submit_answer(
        &self,
        from: Address,
        id: u64,
        handle: Handle,
        proof: &[u8],
    ) -> Result<TxHash> {
        (**self).submit_answer(from, id, handle, proof).await
    }

    async fn wait_for_receipt(&self, tx: &TxHash) -> Result<TxReceipt> {
        (**self).wait_for_receipt(tx).await
    }
}
