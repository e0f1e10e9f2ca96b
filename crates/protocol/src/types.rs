//! Core types for the encrypted quiz workflow.
//!
//! Per-question and score display states, the player's encrypted on-chain
//! records as last read, and the outputs of submission and reconciliation.

use cipherquiz_ledger::{Question, TxHash};
use fhe_engine::{Address, Handle};
use std::collections::{BTreeMap, BTreeSet};

/// Position of a question in the catalog.
pub type QuestionId = u64;

/// A value that is either still unknown to the client or known in plaintext.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// A ciphertext exists but has not been decrypted yet.
    Pending,
    /// Decrypted plaintext.
    Resolved(T),
}

impl<T> From<Option<T>> for Outcome<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Pending, Self::Resolved)
    }
}

/// Where a question stands for the connected player.
///
/// `Unanswered -> Submitting -> Answered(Pending) -> Answered(Resolved(_))`.
/// A failed submission goes back to `Unanswered`; nothing leaves `Answered`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuestionState {
    /// No answer recorded on-chain.
    Unanswered,
    /// A submission is in flight.
    Submitting,
    /// Answered; carries whether the answer was correct once decrypted.
    Answered(Outcome<bool>),
}

/// How the player's score can be shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreDisplay {
    /// A score ciphertext exists but has not been decrypted.
    Locked,
    /// Plaintext score.
    Revealed(u64),
}

/// A confirmed answer transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Answered question.
    pub question_id: QuestionId,
    /// Submitted option, encrypted on-chain.
    pub option: u8,
    /// Transaction hash.
    pub tx: TxHash,
    /// Inclusion block.
    pub block_number: u64,
}

/// The player's encrypted records, read together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerSnapshot {
    /// Player the records belong to.
    pub player: Address,
    /// `hasAnswered` per question.
    pub answered: BTreeMap<QuestionId, bool>,
    /// Encrypted correctness per question; zero when unanswered.
    pub results: BTreeMap<QuestionId, Handle>,
    /// Encrypted running score; zero before the first answer.
    pub score: Handle,
}

impl PlayerSnapshot {
    /// Whether question `id` was answered at read time.
    #[must_use]
    pub fn is_answered(&self, id: QuestionId) -> bool {
        self.answered.get(&id).copied().unwrap_or(false)
    }

    /// Result handle of question `id`, zero if absent.
    #[must_use]
    pub fn result(&self, id: QuestionId) -> Handle {
        self.results.get(&id).copied().unwrap_or(Handle::ZERO)
    }

    /// Every non-zero handle in the snapshot.
    #[must_use]
    pub fn handle_set(&self) -> BTreeSet<Handle> {
        self.results
            .values()
            .chain(std::iter::once(&self.score))
            .filter(|h| !h.is_zero())
            .copied()
            .collect()
    }
}

/// One question as presented to the player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuestionView {
    /// Static metadata.
    pub question: Question,
    /// Currently selected option.
    pub selected: Option<u8>,
    /// Answer state.
    pub state: QuestionState,
}

/// Everything a front-end needs to render the quiz.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuizView {
    /// Connected player.
    pub player: Option<Address>,
    /// Questions in catalog order.
    pub questions: Vec<QuestionView>,
    /// Score display.
    pub score: ScoreDisplay,
    /// Most recent failure of a background refetch or decryption round.
    pub notice: Option<String>,
}

/// What a reconciliation step did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The handle set matched the last reconciled set; nothing was requested.
    Unchanged,
    /// The set changed but every handle was already cached.
    Reused,
    /// Every uncached handle is already being requested by another round.
    InFlight,
    /// A decryption round was run for this many new handles.
    Decrypted(usize),
}
