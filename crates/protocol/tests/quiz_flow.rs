//! End-to-end quiz sessions against the in-process coprocessor and contract.
//!
//! Exercises the full player workflow through `QuizController`:
//! - answer, refetch and decrypt score and results
//! - answer-once enforcement, client-side and on-chain
//! - reconciliation only on handle-set change
//! - signer refusal and impostor signatures
//! - concurrent submissions and selection changes mid-flight
//! - out-of-order refetches, reverted transactions, overlapping rounds

use cipherquiz_ledger::devnet::dev_account;
use cipherquiz_ledger::local::LocalQuiz;
use cipherquiz_ledger::questions::default_catalog;
use cipherquiz_ledger::{Question, QuizLedger, TxHash, TxReceipt, TxStatus};
use fhe_engine::{
    Address, ClearValue, FheError, Handle, LocalWallet, MockCoprocessor, Signature, Signer,
    UserDecryptStatement, WalletError,
};
use protocol::controller::QuizController;
use protocol::decryption::DecryptionSession;
use protocol::types::{Outcome, QuestionState, ReconcileOutcome, ScoreDisplay};
use protocol::ProtocolError;
use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

/// A wallet whose user can be told to refuse or to take their time, and
/// whose prompts are counted.
struct TestWallet {
    inner: LocalWallet,
    refuse: Cell<bool>,
    think_time: Cell<Duration>,
    prompts: Cell<usize>,
}

impl TestWallet {
    fn new(inner: LocalWallet) -> Rc<Self> {
        Rc::new(Self {
            inner,
            refuse: Cell::new(false),
            think_time: Cell::new(Duration::ZERO),
            prompts: Cell::new(0),
        })
    }
}

impl Signer for TestWallet {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_typed_data(
        &self,
        statement: &UserDecryptStatement,
    ) -> Result<Signature, WalletError> {
        self.prompts.set(self.prompts.get() + 1);
        let think_time = self.think_time.get();
        if !think_time.is_zero() {
            tokio::time::sleep(think_time).await;
        }
        if self.refuse.get() {
            return Err(WalletError::Rejected);
        }
        self.inner.sign_typed_data(statement).await
    }
}

/// Claims one identity but signs with another key.
struct Impostor {
    claimed: Address,
    key: LocalWallet,
}

impl Signer for Impostor {
    fn address(&self) -> Address {
        self.claimed
    }

    async fn sign_typed_data(
        &self,
        statement: &UserDecryptStatement,
    ) -> Result<Signature, WalletError> {
        self.key.sign_typed_data(statement).await
    }
}

/// Forwards to a `LocalQuiz`, with knobs to stall calls or revert writes.
struct Scripted {
    inner: Rc<LocalQuiz>,
    slow_score_read: Cell<Option<Duration>>,
    slow_submit: Cell<Option<(u64, Duration)>>,
    revert_writes: Cell<bool>,
    score_reads: Cell<usize>,
}

impl Scripted {
    fn new(inner: Rc<LocalQuiz>) -> Rc<Self> {
        Rc::new(Self {
            inner,
            slow_score_read: Cell::new(None),
            slow_submit: Cell::new(None),
            revert_writes: Cell::new(false),
            score_reads: Cell::new(0),
        })
    }
}

impl QuizLedger for Scripted {
    fn contract_address(&self) -> Address {
        self.inner.contract_address()
    }

    async fn total_questions(&self) -> cipherquiz_ledger::Result<u64> {
        self.inner.total_questions().await
    }

    async fn get_question(&self, id: u64) -> cipherquiz_ledger::Result<Question> {
        self.inner.get_question(id).await
    }

    async fn has_answered(&self, player: Address, id: u64) -> cipherquiz_ledger::Result<bool> {
        self.inner.has_answered(player, id).await
    }

    async fn get_encrypted_result(
        &self,
        player: Address,
        id: u64,
    ) -> cipherquiz_ledger::Result<Handle> {
        self.inner.get_encrypted_result(player, id).await
    }

    async fn get_encrypted_score(&self, player: Address) -> cipherquiz_ledger::Result<Handle> {
        self.score_reads.set(self.score_reads.get() + 1);
        // Only the next read is stalled.
        if let Some(delay) = self.slow_score_read.take() {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_encrypted_score(player).await
    }

    async fn submit_answer(
        &self,
        from: Address,
        id: u64,
        handle: Handle,
        proof: &[u8],
    ) -> cipherquiz_ledger::Result<TxHash> {
        if self.revert_writes.get() {
            return Ok(TxHash([0x0e; 32]));
        }
        if let Some((question, delay)) = self.slow_submit.get() {
            if question == id {
                tokio::time::sleep(delay).await;
            }
        }
        self.inner.submit_answer(from, id, handle, proof).await
    }

    async fn wait_for_receipt(&self, tx: &TxHash) -> cipherquiz_ledger::Result<TxReceipt> {
        if self.revert_writes.get() {
            return Ok(TxReceipt {
                hash: *tx,
                from: Address::ZERO,
                block_number: 7,
                status: TxStatus::Reverted("out of gas".to_string()),
                events: Vec::new(),
            });
        }
        self.inner.wait_for_receipt(tx).await
    }
}

type Session<S> = QuizController<Rc<MockCoprocessor>, Rc<LocalQuiz>, S>;
type ScriptedSession = QuizController<Rc<MockCoprocessor>, Rc<Scripted>, Rc<TestWallet>>;

fn deploy(block_time: Duration) -> (Rc<MockCoprocessor>, Rc<LocalQuiz>) {
    let engine = Rc::new(MockCoprocessor::new());
    let deployer = dev_account(0).expect("dev account").address();
    let quiz = LocalQuiz::deploy(engine.clone(), deployer, &default_catalog())
        .expect("deploy should succeed")
        .with_block_time(block_time);
    (engine, Rc::new(quiz))
}

fn alice() -> Rc<TestWallet> {
    TestWallet::new(dev_account(1).expect("dev account"))
}

async fn scripted_session(
    engine: &Rc<MockCoprocessor>,
    ledger: &Rc<Scripted>,
    wallet: &Rc<TestWallet>,
) -> ScriptedSession {
    let controller = QuizController::new(engine.clone(), ledger.clone(), Some(wallet.clone()));
    controller.refresh().await.expect("initial refresh should succeed");
    controller
}

async fn session<S: Signer>(
    engine: &Rc<MockCoprocessor>,
    quiz: &Rc<LocalQuiz>,
    wallet: Option<S>,
) -> Session<S> {
    let controller = QuizController::new(engine.clone(), quiz.clone(), wallet);
    controller.refresh().await.expect("initial refresh should succeed");
    controller
}

#[tokio::test]
async fn nothing_is_recorded_before_any_submission() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let wallet = alice();
    let c = session(&engine, &quiz, Some(wallet.clone())).await;

    for id in 0..2 {
        assert!(!quiz.has_answered(wallet.address(), id).await.unwrap());
        assert!(quiz
            .get_encrypted_result(wallet.address(), id)
            .await
            .unwrap()
            .is_zero());
        assert_eq!(c.question_state(id), QuestionState::Unanswered);
    }
    assert_eq!(c.score(), ScoreDisplay::Revealed(0));
    assert_eq!(c.reconcile().await.unwrap(), ReconcileOutcome::Unchanged);
    assert_eq!(wallet.prompts.get(), 0, "empty handle set must not prompt");
}

#[tokio::test]
async fn alice_plays_the_whole_quiz() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let wallet = alice();
    let c = session(&engine, &quiz, Some(wallet.clone())).await;

    // Correct answer to question 0.
    c.select_option(0, 0).unwrap();
    c.submit(0).await.expect("first answer should be accepted");
    assert!(quiz.has_answered(wallet.address(), 0).await.unwrap());
    assert_eq!(c.score(), ScoreDisplay::Revealed(50));
    assert_eq!(
        c.question_state(0),
        QuestionState::Answered(Outcome::Resolved(true))
    );

    // Wrong answer to question 1 leaves the score unchanged.
    c.select_option(1, 1).unwrap();
    c.submit(1).await.expect("second answer should be accepted");
    assert_eq!(c.score(), ScoreDisplay::Revealed(50));
    assert_eq!(
        c.question_state(1),
        QuestionState::Answered(Outcome::Resolved(false))
    );

    // Resubmitting question 0 is refused.
    c.select_option(0, 1).unwrap();
    let err = c.submit(0).await.unwrap_err();
    assert!(matches!(err, ProtocolError::AlreadyAnswered { question: 0, .. }));
    assert_eq!(err.to_string(), "Question already answered");
    assert_eq!(c.score(), ScoreDisplay::Revealed(50));
    assert_eq!(quiz.events().len(), 2);
}

#[tokio::test]
async fn stale_session_gets_on_chain_revert() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let wallet = alice();
    let first = session(&engine, &quiz, Some(wallet.clone())).await;
    let stale = session(&engine, &quiz, Some(wallet.clone())).await;

    first.select_option(0, 0).unwrap();
    first.submit(0).await.unwrap();

    stale.select_option(0, 1).unwrap();
    let err = stale.submit(0).await.unwrap_err();
    assert!(matches!(err, ProtocolError::AlreadyAnswered { .. }));

    // The failed write was still followed by a refetch.
    assert_eq!(
        stale.question_state(0),
        QuestionState::Answered(Outcome::Resolved(true))
    );
    assert_eq!(stale.score(), ScoreDisplay::Revealed(50));
}

#[tokio::test]
async fn unchanged_handle_set_does_not_prompt_again() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let wallet = alice();
    let c = session(&engine, &quiz, Some(wallet.clone())).await;

    c.select_option(0, 0).unwrap();
    c.submit(0).await.unwrap();
    assert_eq!(wallet.prompts.get(), 1);

    c.refresh().await.unwrap();
    assert_eq!(c.reconcile().await.unwrap(), ReconcileOutcome::Unchanged);
    assert_eq!(c.reconcile().await.unwrap(), ReconcileOutcome::Unchanged);
    assert_eq!(wallet.prompts.get(), 1);
}

#[tokio::test]
async fn decrypting_the_same_set_twice_is_idempotent() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let wallet = alice();
    let c = session(&engine, &quiz, Some(wallet.clone())).await;
    c.select_option(0, 0).unwrap();
    c.submit(0).await.unwrap();

    let score = quiz.get_encrypted_score(wallet.address()).await.unwrap();
    let result = quiz.get_encrypted_result(wallet.address(), 0).await.unwrap();
    let handles: BTreeSet<_> = [score, result].into_iter().collect();
    let decryption = DecryptionSession::new(&engine, quiz.contract_address());

    let first = decryption
        .decrypt_values(Some(&wallet), &handles)
        .await
        .unwrap();
    let second = decryption
        .decrypt_values(Some(&wallet), &handles)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first[&score], ClearValue::Uint(50));
    assert_eq!(first[&result], ClearValue::Bool(true));
}

#[tokio::test]
async fn refused_signature_keeps_cached_values() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let wallet = alice();
    let c = session(&engine, &quiz, Some(wallet.clone())).await;

    c.select_option(0, 0).unwrap();
    c.submit(0).await.unwrap();
    assert_eq!(c.score(), ScoreDisplay::Revealed(50));

    // The write goes through; only the follow-up decryption is refused.
    wallet.refuse.set(true);
    c.select_option(1, 0).unwrap();
    c.submit(1).await.expect("submission does not need a signature");
    assert_eq!(
        c.question_state(0),
        QuestionState::Answered(Outcome::Resolved(true)),
        "previously decrypted result must stay visible"
    );
    assert_eq!(c.question_state(1), QuestionState::Answered(Outcome::Pending));
    assert_eq!(c.score(), ScoreDisplay::Locked, "new score handle is unknown");
    assert!(c.view().notice.is_some());

    // Retrying after approval only requests the two new handles.
    wallet.refuse.set(false);
    assert_eq!(c.reconcile().await.unwrap(), ReconcileOutcome::Decrypted(2));
    assert_eq!(c.score(), ScoreDisplay::Revealed(150));
    assert!(c.view().notice.is_none());
}

#[tokio::test]
async fn impostor_signature_fails_the_round() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let wallet = alice();
    let c = session(&engine, &quiz, Some(wallet.clone())).await;
    c.select_option(0, 0).unwrap();
    c.submit(0).await.unwrap();

    let impostor = Impostor {
        claimed: wallet.address(),
        key: LocalWallet::random(),
    };
    let score = quiz.get_encrypted_score(wallet.address()).await.unwrap();
    let err = DecryptionSession::new(&engine, quiz.contract_address())
        .decrypt(Some(&impostor), &BTreeSet::from([score]))
        .await
        .unwrap_err();
    assert!(
        matches!(err, ProtocolError::Engine(FheError::Authorization(_))),
        "got {err:?}"
    );
}

#[tokio::test]
async fn other_players_handles_cannot_be_decrypted() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let alice = alice();
    let c = session(&engine, &quiz, Some(alice.clone())).await;
    c.select_option(0, 0).unwrap();
    c.submit(0).await.unwrap();

    let bob = TestWallet::new(dev_account(2).unwrap());
    let alice_score = quiz.get_encrypted_score(alice.address()).await.unwrap();
    let err = DecryptionSession::new(&engine, quiz.contract_address())
        .decrypt(Some(&bob), &BTreeSet::from([alice_score]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Engine(FheError::NotAllowed { .. })));
}

#[tokio::test]
async fn engine_not_ready_sends_nothing() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let c = session(&engine, &quiz, Some(alice())).await;
    engine.set_ready(false);

    c.select_option(0, 0).unwrap();
    let err = c.submit(0).await.unwrap_err();
    assert!(matches!(err, ProtocolError::EngineNotReady));
    assert!(quiz.events().is_empty());
    assert_eq!(c.question_state(0), QuestionState::Unanswered);
}

#[tokio::test]
async fn two_questions_in_flight_at_once() {
    let (engine, quiz) = deploy(Duration::from_millis(50));
    let c = session(&engine, &quiz, Some(alice())).await;
    c.select_option(0, 0).unwrap();
    c.select_option(1, 0).unwrap();

    let observe = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        (c.question_state(0), c.question_state(1))
    };
    let (first, second, during) = tokio::join!(c.submit(0), c.submit(1), observe);

    assert!(first.is_ok() && second.is_ok());
    assert_eq!(
        during,
        (QuestionState::Submitting, QuestionState::Submitting)
    );
    assert_eq!(c.score(), ScoreDisplay::Revealed(150));
}

#[tokio::test]
async fn duplicate_submit_is_refused_while_in_flight() {
    let (engine, quiz) = deploy(Duration::from_millis(20));
    let c = session(&engine, &quiz, Some(alice())).await;
    c.select_option(0, 0).unwrap();

    let (first, second) = tokio::join!(c.submit(0), c.submit(0));
    assert!(first.is_ok());
    assert!(matches!(second, Err(ProtocolError::SubmissionInFlight(0))));
    assert_eq!(quiz.events().len(), 1);
}

#[tokio::test]
async fn racing_sessions_yield_one_already_answered() {
    let (engine, quiz) = deploy(Duration::from_millis(20));
    let wallet = alice();
    let tab_a = session(&engine, &quiz, Some(wallet.clone())).await;
    let tab_b = session(&engine, &quiz, Some(wallet.clone())).await;
    tab_a.select_option(0, 0).unwrap();
    tab_b.select_option(0, 1).unwrap();

    let (a, b) = tokio::join!(tab_a.submit(0), tab_b.submit(0));
    let rejected = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(ProtocolError::AlreadyAnswered { .. })))
        .count();
    assert_eq!(rejected, 1);
    assert!(a.is_ok() != b.is_ok());
    assert_eq!(tab_a.score(), tab_b.score());
}

#[tokio::test]
async fn selection_change_does_not_abort_submission() {
    let (engine, quiz) = deploy(Duration::from_millis(30));
    let c = session(&engine, &quiz, Some(alice())).await;
    c.select_option(0, 0).unwrap();

    let change = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        c.select_option(0, 1).unwrap();
    };
    let (receipt, ()) = tokio::join!(c.submit(0), change);

    let receipt = receipt.expect("in-flight submission should complete");
    assert_eq!(receipt.option, 0);
    assert_eq!(c.selected(0), Some(1));
    assert_eq!(
        c.question_state(0),
        QuestionState::Answered(Outcome::Resolved(true))
    );
}

#[tokio::test]
async fn slow_earlier_refresh_does_not_undo_a_later_answer() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let wallet = alice();
    let ledger = Scripted::new(quiz.clone());
    let c = scripted_session(&engine, &ledger, &wallet).await;
    c.select_option(0, 0).unwrap();
    c.select_option(1, 0).unwrap();

    // The refetch after q0 reads flags before q1 lands but finishes last.
    ledger.slow_score_read.set(Some(Duration::from_millis(100)));
    ledger.slow_submit.set(Some((1, Duration::from_millis(30))));
    let (first, second) = tokio::join!(c.submit(0), c.submit(1));
    first.expect("q0 should be accepted");
    second.expect("q1 should be accepted");

    assert!(quiz.has_answered(wallet.address(), 1).await.unwrap());
    assert_eq!(
        c.question_state(1),
        QuestionState::Answered(Outcome::Resolved(true))
    );
    assert_eq!(
        c.question_state(0),
        QuestionState::Answered(Outcome::Resolved(true))
    );
    assert_eq!(c.score(), ScoreDisplay::Revealed(150));
}

#[tokio::test]
async fn reverted_write_returns_to_unanswered_after_refetch() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let wallet = alice();
    let ledger = Scripted::new(quiz.clone());
    let c = scripted_session(&engine, &ledger, &wallet).await;
    c.select_option(0, 0).unwrap();
    ledger.revert_writes.set(true);
    let reads_before = ledger.score_reads.get();

    let err = c.submit(0).await.unwrap_err();
    assert!(
        matches!(&err, ProtocolError::SubmissionFailed(reason) if reason.contains("out of gas")),
        "got {err:?}"
    );
    assert_eq!(
        ledger.score_reads.get(),
        reads_before + 1,
        "write must be followed by a refetch"
    );
    assert_eq!(c.question_state(0), QuestionState::Unanswered);
    assert_eq!(c.selected(0), Some(0), "selection survives a failed write");
    assert!(c.view().notice.is_none());
    assert!(!quiz.has_answered(wallet.address(), 0).await.unwrap());
}

#[tokio::test]
async fn overlapping_reconciles_prompt_once() {
    let (engine, quiz) = deploy(Duration::ZERO);
    let wallet = alice();
    let c = session(&engine, &quiz, Some(wallet.clone())).await;

    // Leave two handles undecrypted.
    wallet.refuse.set(true);
    c.select_option(0, 0).unwrap();
    c.submit(0).await.unwrap();
    assert_eq!(wallet.prompts.get(), 1);

    wallet.refuse.set(false);
    wallet.think_time.set(Duration::from_millis(20));
    let (a, b) = tokio::join!(c.reconcile(), c.reconcile());
    assert_eq!(a.unwrap(), ReconcileOutcome::Decrypted(2));
    assert_eq!(b.unwrap(), ReconcileOutcome::InFlight);
    assert_eq!(wallet.prompts.get(), 2, "second reconcile must not prompt");
    assert_eq!(c.score(), ScoreDisplay::Revealed(50));
    assert_eq!(c.reconcile().await.unwrap(), ReconcileOutcome::Unchanged);
}
