//! Play command: two players go through a full quiz session in memory.
//!
//! Shows the per-question state machine and the score display moving from
//! locked to revealed as submissions land and decryption rounds resolve.

use anyhow::{Context, Result};
use cipherquiz_ledger::devnet::{dev_account, Devnet};
use cipherquiz_ledger::local::LocalQuiz;
use cipherquiz_ledger::questions::default_catalog;
use cipherquiz_ledger::QuizLedger;
use fhe_engine::{LocalWallet, MockCoprocessor};
use protocol::controller::QuizController;
use protocol::types::{Outcome, QuestionState, QuizView, ScoreDisplay};
use protocol::ProtocolError;
use std::rc::Rc;

type Session = QuizController<Rc<MockCoprocessor>, Rc<LocalQuiz>, LocalWallet>;

fn describe(state: QuestionState) -> &'static str {
    match state {
        QuestionState::Unanswered => "unanswered",
        QuestionState::Submitting => "submitting",
        QuestionState::Answered(Outcome::Pending) => "answered (result locked)",
        QuestionState::Answered(Outcome::Resolved(true)) => "answered: correct",
        QuestionState::Answered(Outcome::Resolved(false)) => "answered: incorrect",
    }
}

fn print_view(name: &str, view: &QuizView) {
    let player = view
        .player
        .map_or_else(|| "not connected".to_string(), |p| p.to_string());
    println!("  {name} ({player})");
    for q in &view.questions {
        println!("    [{}] {}", q.question.id, describe(q.state));
    }
    match view.score {
        ScoreDisplay::Locked => println!("    score: locked"),
        ScoreDisplay::Revealed(score) => println!("    score: {score}"),
    }
    if let Some(notice) = &view.notice {
        println!("    notice: {notice}");
    }
}

async fn answer(session: &Session, question: u64, option: u8) -> Result<()> {
    session.select_option(question, option)?;
    match session.submit(question).await {
        Ok(receipt) => {
            println!(
                "  option {option} for question {question} included in block {}",
                receipt.block_number
            );
            Ok(())
        }
        Err(e @ ProtocolError::AlreadyAnswered { .. }) => {
            println!("  question {question} rejected: {e}");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("question {question} failed")),
    }
}

/// Runs the in-memory walk-through.
pub async fn run() -> Result<()> {
    println!("Step 0: Deploy");
    let devnet = Devnet::deploy(&default_catalog()).context("deploy failed")?;
    println!("  EncryptedQuiz at {}", devnet.quiz().contract_address());

    let alice: Session = QuizController::new(
        devnet.engine().clone(),
        devnet.quiz().clone(),
        Some(dev_account(1)?),
    );
    let bob: Session = QuizController::new(
        devnet.engine().clone(),
        devnet.quiz().clone(),
        Some(dev_account(2)?),
    );
    alice.refresh().await?;
    bob.refresh().await?;
    for q in alice.questions() {
        println!("  [{}] {} / {} ({} pts)", q.id, q.options[0], q.options[1], q.reward);
    }
    print_view("alice", &alice.view());

    println!();
    println!("Step 1: Alice answers question 0 with option 0");
    answer(&alice, 0, 0).await?;
    print_view("alice", &alice.view());

    println!();
    println!("Step 2: Alice answers question 1 with option 1");
    answer(&alice, 1, 1).await?;
    print_view("alice", &alice.view());

    println!();
    println!("Step 3: Alice tries question 0 again");
    answer(&alice, 0, 1).await?;
    print_view("alice", &alice.view());

    println!();
    println!("Step 4: Bob answers both questions at once");
    bob.select_option(0, 0)?;
    bob.select_option(1, 0)?;
    let (first, second) = tokio::join!(bob.submit(0), bob.submit(1));
    first.context("bob's first answer failed")?;
    second.context("bob's second answer failed")?;
    print_view("bob", &bob.view());

    println!();
    println!("=== Session Complete ===");
    println!("  {} answers recorded on-chain", devnet.quiz().events().len());
    Ok(())
}
