//! Single-shot commands against the persisted devnet.
//!
//! Each command loads the devnet (deploying the default quiz on first use),
//! performs one submission or one decryption round, and saves the devnet
//! back when it changed.

use anyhow::{bail, Context, Result};
use cipherquiz_ledger::devnet::{dev_account, Devnet};
use cipherquiz_ledger::QuizLedger;
use fhe_engine::{ClearValue, Signer};
use protocol::decryption::DecryptionSession;
use protocol::reader::StateReader;
use protocol::submission::SubmissionClient;
use protocol::ProtocolError;
use std::collections::BTreeSet;
use std::path::Path;

fn open(state: &Path) -> Result<Devnet> {
    let devnet = Devnet::load_or_deploy(state)
        .with_context(|| format!("failed to open devnet state {}", state.display()))?;
    if !state.exists() {
        devnet.save(state).context("failed to save devnet state")?;
    }
    Ok(devnet)
}

/// Prints the quiz contract address.
pub fn address(state: &Path) -> Result<()> {
    let devnet = open(state)?;
    println!("EncryptedQuiz address: {}", devnet.quiz().contract_address());
    Ok(())
}

/// Prints every question with its options and reward.
pub async fn questions(state: &Path) -> Result<()> {
    let devnet = open(state)?;
    let questions = StateReader::new(devnet.quiz()).questions().await?;
    for q in questions {
        println!("[{}] {} ({} pts)", q.id, q.prompt, q.reward);
        println!("    0: {}", q.options[0]);
        println!("    1: {}", q.options[1]);
    }
    Ok(())
}

/// Decrypts the score of development account `player`.
pub async fn score(state: &Path, player: u32) -> Result<()> {
    let devnet = open(state)?;
    let wallet = dev_account(player)?;
    let handle = StateReader::new(devnet.quiz())
        .score_handle(wallet.address())
        .await?;

    println!("Player:       {}", wallet.address());
    if handle.is_zero() {
        println!("Score:        0 (nothing answered yet)");
        return Ok(());
    }
    println!("Score handle: {handle}");

    let values = DecryptionSession::new(devnet.engine(), devnet.quiz().contract_address())
        .decrypt_values(Some(&wallet), &BTreeSet::from([handle]))
        .await
        .context("score decryption failed")?;
    match values.get(&handle).and_then(ClearValue::as_uint) {
        Some(score) => println!("Score:        {score}"),
        None => bail!("decryption did not return an integer score"),
    }
    Ok(())
}

/// Decrypts whether `account` answered `question` correctly.
pub async fn result(state: &Path, account: u32, question: u64) -> Result<()> {
    let devnet = open(state)?;
    let wallet = dev_account(account)?;
    let handle = devnet
        .quiz()
        .get_encrypted_result(wallet.address(), question)
        .await?;

    if handle.is_zero() {
        println!("Question {question} has not been answered by {}", wallet.address());
        return Ok(());
    }
    println!("Result handle: {handle}");

    let values = DecryptionSession::new(devnet.engine(), devnet.quiz().contract_address())
        .decrypt_values(Some(&wallet), &BTreeSet::from([handle]))
        .await
        .context("result decryption failed")?;
    match values.get(&handle).and_then(ClearValue::as_bool) {
        Some(true) => println!("Question {question}: correct"),
        Some(false) => println!("Question {question}: incorrect"),
        None => bail!("decryption did not return a boolean result"),
    }
    Ok(())
}

/// Encrypts `option` and submits it as `account`'s answer to `question`.
pub async fn answer(state: &Path, account: u32, question: u64, option: u8) -> Result<()> {
    let devnet = open(state)?;
    let wallet = dev_account(account)?;
    let quiz = devnet.quiz();
    let reader = StateReader::new(quiz);
    let total = quiz.total_questions().await?;
    let answered = reader
        .answered_flags(wallet.address(), &[question])
        .await?
        .get(&question)
        .copied()
        .unwrap_or(false);

    println!("Submitting option {option} for question {question} as {}", wallet.address());
    let client = SubmissionClient::new(devnet.engine(), quiz, total);
    let receipt = match client
        .submit_answer(Some(&wallet), question, option, answered)
        .await
    {
        Ok(receipt) => receipt,
        Err(e @ ProtocolError::AlreadyAnswered { .. }) => {
            println!("  {e}");
            return Ok(());
        }
        Err(e) => return Err(e).context("answer submission failed"),
    };
    devnet.save(state).context("failed to save devnet state")?;

    println!("  tx:    {}", receipt.tx);
    println!("  block: {}", receipt.block_number);
    println!("Answer recorded. Run `cipherquiz result --question {question}` to decrypt it.");
    Ok(())
}
