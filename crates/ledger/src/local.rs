//! In-memory encrypted quiz contract.
//!
//! Executes `submitAnswer` against a [`MockCoprocessor`]: the submitted
//! option is verified as an external input, compared with the encrypted
//! correct option, and the reward is added to the player's encrypted score
//! through an encrypted select. Both result and score are shared with the
//! player through the coprocessor ACL. An answer is accepted at most once
//! per (player, question).

use fhe_engine::mock::ExecutionScope;
use fhe_engine::{keccak256, Address, FheError, FheType, Handle, MockCoprocessor};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use crate::questions::QuestionSpec;
use crate::{
    AnswerSubmitted, LedgerError, Question, QuizLedger, Result, TxHash, TxReceipt, TxStatus,
    INVALID_QUESTION,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct StoredQuestion {
    question: Question,
    answer: Handle,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PlayerRecord {
    score: Handle,
    results: BTreeMap<u64, Handle>,
}

/// Persistable contract storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSnapshot {
    address: Address,
    questions: Vec<StoredQuestion>,
    players: BTreeMap<Address, PlayerRecord>,
    receipts: BTreeMap<TxHash, TxReceipt>,
    events: Vec<AnswerSubmitted>,
    nonce: u64,
    block_number: u64,
}

/// The quiz contract, executed in process.
#[derive(Debug)]
pub struct LocalQuiz {
    engine: Rc<MockCoprocessor>,
    state: RefCell<QuizSnapshot>,
    block_time: Duration,
}

fn revert(err: FheError) -> LedgerError {
    LedgerError::Reverted(err.to_string())
}

impl LocalQuiz {
    /// Deploys a fresh contract from `deployer` with the given catalog.
    ///
    /// # Errors
    /// Returns `LedgerError::Reverted` if a catalog entry names an option
    /// other than 0 or 1.
    pub fn deploy(
        engine: Rc<MockCoprocessor>,
        deployer: Address,
        catalog: &[QuestionSpec],
    ) -> Result<Self> {
        let digest = keccak256(&[&deployer.0, b"EncryptedQuiz"]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        let address = Address(bytes);

        let scope = engine.scope(address);
        let mut questions = Vec::with_capacity(catalog.len());
        for (id, spec) in catalog.iter().enumerate() {
            if spec.correct_option > 1 {
                return Err(LedgerError::Reverted(format!(
                    "question {id} has no option {}",
                    spec.correct_option
                )));
            }
            let answer = scope
                .trivial(u64::from(spec.correct_option), FheType::Uint32)
                .map_err(revert)?;
            questions.push(StoredQuestion {
                question: Question {
                    id: id as u64,
                    prompt: spec.prompt.clone(),
                    options: spec.options.clone(),
                    reward: spec.reward,
                },
                answer,
            });
        }

        tracing::info!(%address, questions = questions.len(), "deployed quiz contract");
        Ok(Self {
            engine,
            state: RefCell::new(QuizSnapshot {
                address,
                questions,
                players: BTreeMap::new(),
                receipts: BTreeMap::new(),
                events: Vec::new(),
                nonce: 0,
                block_number: 0,
            }),
            block_time: Duration::ZERO,
        })
    }

    /// Restores a contract from storage.
    #[must_use]
    pub fn from_snapshot(engine: Rc<MockCoprocessor>, snapshot: QuizSnapshot) -> Self {
        Self {
            engine,
            state: RefCell::new(snapshot),
            block_time: Duration::ZERO,
        }
    }

    /// Current storage.
    #[must_use]
    pub fn snapshot(&self) -> QuizSnapshot {
        self.state.borrow().clone()
    }

    /// Delays every `wait_for_receipt` by `block_time`.
    #[must_use]
    pub fn with_block_time(mut self, block_time: Duration) -> Self {
        self.block_time = block_time;
        self
    }

    /// All `AnswerSubmitted` events so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AnswerSubmitted> {
        self.state.borrow().events.clone()
    }

    fn stored_question(&self, id: u64) -> Result<StoredQuestion> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.state.borrow().questions.get(i).cloned())
            .ok_or_else(|| LedgerError::Reverted(INVALID_QUESTION.to_string()))
    }

    fn score_after(
        scope: &ExecutionScope<'_>,
        current: Handle,
        is_correct: Handle,
        reward: u32,
    ) -> std::result::Result<Handle, FheError> {
        let points = scope.trivial(u64::from(reward), FheType::Uint32)?;
        let nothing = scope.trivial(0, FheType::Uint32)?;
        let gained = scope.select(is_correct, points, nothing)?;
        if current.is_zero() {
            Ok(gained)
        } else {
            scope.add(current, gained)
        }
    }

    fn execute_submit(
        &self,
        from: Address,
        id: u64,
        handle: Handle,
        proof: &[u8],
    ) -> Result<AnswerSubmitted> {
        let stored = self.stored_question(id)?;
        let current = {
            let state = self.state.borrow();
            let record = state.players.get(&from);
            if record.is_some_and(|r| r.results.contains_key(&id)) {
                return Err(LedgerError::AlreadyAnswered);
            }
            record.map_or(Handle::ZERO, |r| r.score)
        };

        let scope = self.engine.scope(self.contract_address());
        let option = scope.verify_input(handle, proof, from).map_err(revert)?;
        let is_correct = scope.eq(option, stored.answer).map_err(revert)?;
        let new_score =
            Self::score_after(&scope, current, is_correct, stored.question.reward).map_err(revert)?;
        scope.allow(is_correct, from).map_err(revert)?;
        scope.allow(new_score, from).map_err(revert)?;

        let mut state = self.state.borrow_mut();
        let record = state.players.entry(from).or_default();
        record.score = new_score;
        record.results.insert(id, is_correct);
        let event = AnswerSubmitted {
            player: from,
            question_id: id,
            is_correct,
            new_score,
        };
        state.events.push(event.clone());
        Ok(event)
    }
}

impl QuizLedger for LocalQuiz {
    fn contract_address(&self) -> Address {
        self.state.borrow().address
    }

    async fn total_questions(&self) -> Result<u64> {
        Ok(self.state.borrow().questions.len() as u64)
    }

    async fn get_question(&self, id: u64) -> Result<Question> {
        Ok(self.stored_question(id)?.question)
    }

    async fn has_answered(&self, player: Address, id: u64) -> Result<bool> {
        Ok(self
            .state
            .borrow()
            .players
            .get(&player)
            .is_some_and(|r| r.results.contains_key(&id)))
    }

    async fn get_encrypted_result(&self, player: Address, id: u64) -> Result<Handle> {
        Ok(self
            .state
            .borrow()
            .players
            .get(&player)
            .and_then(|r| r.results.get(&id).copied())
            .unwrap_or(Handle::ZERO))
    }

    async fn get_encrypted_score(&self, player: Address) -> Result<Handle> {
        Ok(self
            .state
            .borrow()
            .players
            .get(&player)
            .map_or(Handle::ZERO, |r| r.score))
    }

    async fn submit_answer(
        &self,
        from: Address,
        id: u64,
        handle: Handle,
        proof: &[u8],
    ) -> Result<TxHash> {
        let event = match self.execute_submit(from, id, handle, proof) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%from, question = id, error = %e, "submitAnswer reverted");
                return Err(e);
            }
        };

        let mut state = self.state.borrow_mut();
        state.nonce += 1;
        state.block_number += 1;
        let hash = TxHash(keccak256(&[
            &from.0,
            &state.nonce.to_be_bytes(),
            &id.to_be_bytes(),
            &handle.0,
        ]));
        let receipt = TxReceipt {
            hash,
            from,
            block_number: state.block_number,
            status: TxStatus::Success,
            events: vec![event],
        };
        state.receipts.insert(hash, receipt);
        tracing::info!(%from, question = id, tx = %hash, "submitAnswer accepted");
        Ok(hash)
    }

    async fn wait_for_receipt(&self, tx: &TxHash) -> Result<TxReceipt> {
        if !self.block_time.is_zero() {
            tokio::time::sleep(self.block_time).await;
        }
        self.state
            .borrow()
            .receipts
            .get(tx)
            .cloned()
            .ok_or(LedgerError::UnknownTransaction(*tx))
    }
}
