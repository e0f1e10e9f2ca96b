//! Quiz session controller.
//!
//! Composes submission, state reads and decryption into the player-facing
//! workflow: select an option, submit, refetch, reconcile decrypted values.
//!
//! State lives behind a `RefCell` so that several submissions can be in
//! flight on one single-threaded task set; no borrow is held across an
//! `.await`.

use cipherquiz_ledger::{Question, QuizLedger};
use fhe_engine::{Address, ClearValue, FheEngine, Handle, Signer};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::decryption::DecryptionSession;
use crate::reader::StateReader;
use crate::submission::SubmissionClient;
use crate::types::{
    Outcome, PlayerSnapshot, QuestionId, QuestionState, QuestionView, QuizView, ReconcileOutcome,
    ScoreDisplay, SubmissionReceipt,
};
use crate::{ProtocolError, Result};

#[derive(Debug, Default)]
struct SessionState {
    questions: Vec<Question>,
    selected: BTreeMap<QuestionId, u8>,
    in_flight: BTreeSet<QuestionId>,
    snapshot: Option<PlayerSnapshot>,
    // Last refresh ticket handed out, and the ticket of the applied snapshot.
    refresh_seq: u64,
    applied_seq: u64,
    cache: HashMap<Handle, ClearValue>,
    last_decrypted: BTreeSet<Handle>,
    // Handles requested by a round that has not finished yet.
    decrypting: BTreeSet<Handle>,
    notice: Option<String>,
}

/// Drives one player's quiz session.
#[derive(Debug)]
pub struct QuizController<E, L, S> {
    engine: E,
    ledger: L,
    wallet: Option<S>,
    state: RefCell<SessionState>,
}

impl<E: FheEngine, L: QuizLedger, S: Signer> QuizController<E, L, S> {
    /// Creates a controller. `wallet` is `None` until an identity connects.
    pub fn new(engine: E, ledger: L, wallet: Option<S>) -> Self {
        Self {
            engine,
            ledger,
            wallet,
            state: RefCell::new(SessionState::default()),
        }
    }

    /// The connected identity.
    pub fn player(&self) -> Option<Address> {
        self.wallet.as_ref().map(Signer::address)
    }

    /// The encryption engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Questions loaded so far.
    pub fn questions(&self) -> Vec<Question> {
        self.state.borrow().questions.clone()
    }

    /// Fetches the question catalog. Returns the number of questions.
    ///
    /// # Errors
    /// Propagates ledger read errors.
    pub async fn load_questions(&self) -> Result<usize> {
        let questions = StateReader::new(&self.ledger).questions().await?;
        let count = questions.len();
        self.state.borrow_mut().questions = questions;
        Ok(count)
    }

    fn question_count(&self) -> u64 {
        self.state.borrow().questions.len() as u64
    }

    /// Selects `option` for question `id`.
    ///
    /// Allowed while a submission for `id` is in flight; the in-flight
    /// submission is not affected.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidOption` or `ProtocolError::UnknownQuestion`.
    pub fn select_option(&self, id: QuestionId, option: u8) -> Result<()> {
        if option > 1 {
            return Err(ProtocolError::InvalidOption(option));
        }
        if id >= self.question_count() {
            return Err(ProtocolError::UnknownQuestion(id));
        }
        self.state.borrow_mut().selected.insert(id, option);
        Ok(())
    }

    /// Currently selected option for `id`.
    pub fn selected(&self, id: QuestionId) -> Option<u8> {
        self.state.borrow().selected.get(&id).copied()
    }

    /// Submits the selected option for `id`.
    ///
    /// Every attempted write is followed by a refetch of the player's state
    /// and a reconciliation, whether the write succeeded or not. Failures of
    /// that follow-up are logged and kept as the view's notice; they do not
    /// change the submission's result.
    ///
    /// # Errors
    /// Returns `ProtocolError::SubmissionInFlight` if `id` is already being
    /// submitted, `ProtocolError::NoOptionSelected` without a selection, or
    /// any error of [`SubmissionClient::submit_answer`].
    pub async fn submit(&self, id: QuestionId) -> Result<SubmissionReceipt> {
        let (option, answered) = {
            let mut state = self.state.borrow_mut();
            if id >= state.questions.len() as u64 {
                return Err(ProtocolError::UnknownQuestion(id));
            }
            if state.in_flight.contains(&id) {
                return Err(ProtocolError::SubmissionInFlight(id));
            }
            let option = *state
                .selected
                .get(&id)
                .ok_or(ProtocolError::NoOptionSelected(id))?;
            let answered = state
                .snapshot
                .as_ref()
                .is_some_and(|s| s.is_answered(id));
            state.in_flight.insert(id);
            (option, answered)
        };

        let client = SubmissionClient::new(&self.engine, &self.ledger, self.question_count());
        let outcome = client
            .submit_answer(self.wallet.as_ref(), id, option, answered)
            .await;
        self.state.borrow_mut().in_flight.remove(&id);

        match &outcome {
            Err(e) if e.is_precondition() => {}
            Err(ProtocolError::AlreadyAnswered { .. }) => {
                tracing::info!(question = id, "question was already answered");
            }
            Err(e) => tracing::warn!(question = id, error = %e, "submission failed"),
            Ok(_) => {}
        }
        // No write was attempted.
        if outcome.as_ref().is_err_and(ProtocolError::is_precondition) {
            return outcome;
        }

        if let Err(e) = self.sync().await {
            tracing::warn!(question = id, error = %e, "post-submission sync failed");
            self.state.borrow_mut().notice = Some(e.to_string());
        }
        outcome
    }

    async fn sync(&self) -> Result<ReconcileOutcome> {
        self.refresh().await?;
        self.reconcile().await
    }

    /// Rereads answered flags, result handles and the score together.
    ///
    /// Loads the catalog first if it has not been loaded. Overlapping
    /// refreshes may finish in any order; a snapshot whose reads started
    /// before those of the applied one is dropped.
    ///
    /// # Errors
    /// Propagates ledger read errors; the previous snapshot is kept.
    pub async fn refresh(&self) -> Result<()> {
        if self.state.borrow().questions.is_empty() {
            self.load_questions().await?;
        }
        let ids: Vec<QuestionId> = (0..self.question_count()).collect();
        let ticket = {
            let mut state = self.state.borrow_mut();
            state.refresh_seq += 1;
            state.refresh_seq
        };
        let snapshot = StateReader::new(&self.ledger)
            .snapshot(self.player(), &ids)
            .await?;

        let mut state = self.state.borrow_mut();
        if ticket < state.applied_seq {
            tracing::debug!(ticket, applied = state.applied_seq, "dropping stale snapshot");
            return Ok(());
        }
        state.applied_seq = ticket;
        state.snapshot = snapshot;
        Ok(())
    }

    /// Decrypts newly appeared handles.
    ///
    /// Compares the current non-zero handle set with the set of the last
    /// successful reconciliation. Nothing is requested when they are equal;
    /// otherwise only handles missing from the cache are decrypted, in one
    /// round. Handles another round is already requesting are left to it.
    /// A failed round leaves the cache and the last set untouched.
    ///
    /// # Errors
    /// Returns the decryption round's error.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let (current, missing) = {
            let mut state = self.state.borrow_mut();
            let current = state
                .snapshot
                .as_ref()
                .map(PlayerSnapshot::handle_set)
                .unwrap_or_default();
            if current == state.last_decrypted {
                return Ok(ReconcileOutcome::Unchanged);
            }
            let uncached: BTreeSet<Handle> = current
                .iter()
                .filter(|h| !state.cache.contains_key(*h))
                .copied()
                .collect();
            if uncached.is_empty() {
                state.last_decrypted = current;
                return Ok(ReconcileOutcome::Reused);
            }
            let missing: BTreeSet<Handle> =
                uncached.difference(&state.decrypting).copied().collect();
            if missing.is_empty() {
                return Ok(ReconcileOutcome::InFlight);
            }
            state.decrypting.extend(missing.iter().copied());
            (current, missing)
        };

        let session = DecryptionSession::new(&self.engine, self.ledger.contract_address());
        let outcome = session
            .decrypt_values(self.wallet.as_ref(), &missing)
            .await;

        let mut state = self.state.borrow_mut();
        state.decrypting.retain(|h| !missing.contains(h));
        let values = match outcome {
            Ok(values) => values,
            Err(e) => {
                state.notice = Some(e.to_string());
                return Err(e);
            }
        };

        state.cache.extend(values);
        // Handles the engine left out are requested again next time.
        let resolved: BTreeSet<Handle> = current
            .into_iter()
            .filter(|h| state.cache.contains_key(h))
            .collect();
        state.last_decrypted = resolved;
        state.notice = None;
        tracing::debug!(requested = missing.len(), cached = state.cache.len(), "reconciled");
        Ok(ReconcileOutcome::Decrypted(missing.len()))
    }

    /// State of question `id` for the connected player.
    pub fn question_state(&self, id: QuestionId) -> QuestionState {
        let state = self.state.borrow();
        if let Some(snapshot) = state.snapshot.as_ref().filter(|s| s.is_answered(id)) {
            let correct = state
                .cache
                .get(&snapshot.result(id))
                .and_then(ClearValue::as_bool);
            return QuestionState::Answered(Outcome::from(correct));
        }
        if state.in_flight.contains(&id) {
            QuestionState::Submitting
        } else {
            QuestionState::Unanswered
        }
    }

    /// The player's score as it can currently be shown.
    pub fn score(&self) -> ScoreDisplay {
        let state = self.state.borrow();
        let Some(snapshot) = &state.snapshot else {
            return ScoreDisplay::Locked;
        };
        if snapshot.score.is_zero() {
            return ScoreDisplay::Revealed(0);
        }
        state
            .cache
            .get(&snapshot.score)
            .and_then(ClearValue::as_uint)
            .map_or(ScoreDisplay::Locked, ScoreDisplay::Revealed)
    }

    /// Everything needed to render the session.
    pub fn view(&self) -> QuizView {
        let questions = self.questions();
        let questions = questions
            .into_iter()
            .map(|question| {
                let id = question.id;
                QuestionView {
                    question,
                    selected: self.selected(id),
                    state: self.question_state(id),
                }
            })
            .collect();
        QuizView {
            player: self.player(),
            questions,
            score: self.score(),
            notice: self.state.borrow().notice.clone(),
        }
    }
}
