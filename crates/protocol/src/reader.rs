//! Reads of the quiz contract's encrypted state.
//!
//! Stateless: every call goes to the ledger. A handle is only treated as
//! present when it differs from the zero handle.

use cipherquiz_ledger::{Question, QuizLedger};
use fhe_engine::{Address, Handle};
use std::collections::BTreeMap;

use crate::types::{PlayerSnapshot, QuestionId};
use crate::Result;

/// Batch reads against a [`QuizLedger`].
#[derive(Debug)]
pub struct StateReader<'a, L> {
    ledger: &'a L,
}

impl<'a, L: QuizLedger> StateReader<'a, L> {
    /// Wraps a ledger.
    #[must_use]
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    /// The whole catalog, in id order.
    ///
    /// # Errors
    /// Propagates ledger read errors.
    pub async fn questions(&self) -> Result<Vec<Question>> {
        let total = self.ledger.total_questions().await?;
        let mut questions = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
        for id in 0..total {
            questions.push(self.ledger.get_question(id).await?);
        }
        tracing::debug!(count = questions.len(), "fetched question catalog");
        Ok(questions)
    }

    /// `hasAnswered(player, id)` for each of `ids`.
    ///
    /// # Errors
    /// Propagates ledger read errors.
    pub async fn answered_flags(
        &self,
        player: Address,
        ids: &[QuestionId],
    ) -> Result<BTreeMap<QuestionId, bool>> {
        let mut flags = BTreeMap::new();
        for &id in ids {
            flags.insert(id, self.ledger.has_answered(player, id).await?);
        }
        Ok(flags)
    }

    /// `getEncryptedResult(player, id)` for each of `ids`.
    ///
    /// # Errors
    /// Propagates ledger read errors.
    pub async fn result_handles(
        &self,
        player: Address,
        ids: &[QuestionId],
    ) -> Result<BTreeMap<QuestionId, Handle>> {
        let mut handles = BTreeMap::new();
        for &id in ids {
            handles.insert(id, self.ledger.get_encrypted_result(player, id).await?);
        }
        Ok(handles)
    }

    /// `getEncryptedScore(player)`.
    ///
    /// # Errors
    /// Propagates ledger read errors.
    pub async fn score_handle(&self, player: Address) -> Result<Handle> {
        Ok(self.ledger.get_encrypted_score(player).await?)
    }

    /// Reads answered flags, result handles and the score handle together.
    ///
    /// The three reads run concurrently and the snapshot is only built once
    /// all of them completed. Returns `None` without touching the ledger
    /// when no identity is connected.
    ///
    /// # Errors
    /// Returns the first failed read; no partial snapshot is produced.
    pub async fn snapshot(
        &self,
        player: Option<Address>,
        ids: &[QuestionId],
    ) -> Result<Option<PlayerSnapshot>> {
        let Some(player) = player else {
            return Ok(None);
        };
        let (answered, results, score) = tokio::join!(
            self.answered_flags(player, ids),
            self.result_handles(player, ids),
            self.score_handle(player),
        );
        let snapshot = PlayerSnapshot {
            player,
            answered: answered?,
            results: results?,
            score: score?,
        };
        tracing::debug!(
            %player,
            answered = snapshot.answered.values().filter(|a| **a).count(),
            handles = snapshot.handle_set().len(),
            "refreshed player state"
        );
        Ok(Some(snapshot))
    }
}
