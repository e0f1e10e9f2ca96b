//! cipherquiz CLI: play the encrypted quiz against a local devnet.
//!
//! Subcommands: address, questions, score, result, answer, play.
//! State is kept in a JSON devnet file so successive invocations see each
//! other's answers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod play;
mod tasks;

#[derive(Parser)]
#[command(name = "cipherquiz", about = "Encrypted on-chain quiz client")]
struct Cli {
    /// Devnet state file
    #[arg(long, global = true, default_value = cipherquiz_ledger::devnet::DEFAULT_STATE_FILE)]
    state: PathBuf,

    /// Development account acting as the player
    #[arg(long, global = true, default_value = "1")]
    account: u32,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the deployed quiz contract address
    Address,

    /// List the questions
    Questions,

    /// Decrypt a player's score
    Score {
        /// Account to read; defaults to --account
        #[arg(long)]
        player: Option<u32>,
    },

    /// Decrypt the result of one of your answers
    Result {
        #[arg(long)]
        question: u64,
    },

    /// Submit an encrypted answer
    Answer {
        #[arg(long)]
        question: u64,
        #[arg(long)]
        option: u8,
    },

    /// Walk two players through a full in-memory session
    Play,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.cmd {
        Cmd::Address => tasks::address(&cli.state)?,
        Cmd::Questions => tasks::questions(&cli.state).await?,
        Cmd::Score { player } => {
            tasks::score(&cli.state, player.unwrap_or(cli.account)).await?;
        }
        Cmd::Result { question } => tasks::result(&cli.state, cli.account, question).await?,
        Cmd::Answer { question, option } => {
            tasks::answer(&cli.state, cli.account, question, option).await?;
        }
        Cmd::Play => play::run().await?,
    }

    Ok(())
}
