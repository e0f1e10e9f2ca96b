//! Answer submission.
//!
//! Turns a plaintext option into an encrypted input scoped to the quiz
//! contract and the caller, sends it as a single `submitAnswer` write and
//! waits for inclusion. The answer-once rule is checked here only as an
//! advisory; the contract's revert is authoritative.

use cipherquiz_ledger::{LedgerError, QuizLedger, TxStatus, ALREADY_ANSWERED};
use fhe_engine::{FheEngine, FheError, Signer};

use crate::types::{QuestionId, SubmissionReceipt};
use crate::{ProtocolError, Result};

/// Submits answers on behalf of a connected identity.
#[derive(Debug)]
pub struct SubmissionClient<'a, E, L> {
    engine: &'a E,
    ledger: &'a L,
    question_count: u64,
}

/// Maps a contract rejection to the protocol taxonomy.
fn rejection(question: QuestionId, reason: String) -> ProtocolError {
    if reason.contains(ALREADY_ANSWERED) {
        ProtocolError::AlreadyAnswered { question, reason }
    } else {
        ProtocolError::SubmissionFailed(reason)
    }
}

fn ledger_failure(question: QuestionId, err: LedgerError) -> ProtocolError {
    match err {
        LedgerError::AlreadyAnswered => rejection(question, ALREADY_ANSWERED.to_string()),
        LedgerError::Reverted(reason) => rejection(question, reason),
        other => ProtocolError::SubmissionFailed(other.to_string()),
    }
}

impl<'a, E: FheEngine, L: QuizLedger> SubmissionClient<'a, E, L> {
    /// Creates a client for a catalog of `question_count` questions.
    #[must_use]
    pub fn new(engine: &'a E, ledger: &'a L, question_count: u64) -> Self {
        Self {
            engine,
            ledger,
            question_count,
        }
    }

    /// Encrypts `option_index` and submits it as the answer to `question_id`.
    ///
    /// `answered` is the caller's latest read of `hasAnswered` and is only
    /// used to refuse early. Preconditions are checked in order (option,
    /// question id, identity, engine readiness, answered flag) and rejected
    /// before any network call.
    ///
    /// # Errors
    ///
    /// Returns the failed precondition, `ProtocolError::AlreadyAnswered`
    /// with the contract's revert text, or `ProtocolError::SubmissionFailed`
    /// for any other rejection or transport failure.
    pub async fn submit_answer<S: Signer>(
        &self,
        wallet: Option<&S>,
        question_id: QuestionId,
        option_index: u8,
        answered: bool,
    ) -> Result<SubmissionReceipt> {
        if option_index > 1 {
            return Err(ProtocolError::InvalidOption(option_index));
        }
        if question_id >= self.question_count {
            return Err(ProtocolError::UnknownQuestion(question_id));
        }
        let caller = wallet.ok_or(ProtocolError::NotConnected)?.address();
        if !self.engine.is_ready() {
            return Err(ProtocolError::EngineNotReady);
        }
        if answered {
            return Err(ProtocolError::AlreadyAnswered {
                question: question_id,
                reason: ALREADY_ANSWERED.to_string(),
            });
        }

        let contract = self.ledger.contract_address();
        let input = self
            .engine
            .create_encrypted_input(contract, caller)
            .add32(u32::from(option_index))
            .encrypt()
            .await?;
        let handle = input
            .handles
            .first()
            .copied()
            .ok_or_else(|| FheError::InvalidEncoding("encrypted input has no handle".into()))?;

        let tx = self
            .ledger
            .submit_answer(caller, question_id, handle, &input.proof)
            .await
            .map_err(|e| ledger_failure(question_id, e))?;
        tracing::info!(%caller, question = question_id, %tx, "answer submitted, awaiting inclusion");

        let receipt = self
            .ledger
            .wait_for_receipt(&tx)
            .await
            .map_err(|e| ledger_failure(question_id, e))?;
        if let TxStatus::Reverted(reason) = receipt.status {
            return Err(rejection(question_id, reason));
        }

        tracing::info!(
            question = question_id,
            block = receipt.block_number,
            "answer confirmed"
        );
        Ok(SubmissionReceipt {
            question_id,
            option: option_index,
            tx,
            block_number: receipt.block_number,
        })
    }
}
