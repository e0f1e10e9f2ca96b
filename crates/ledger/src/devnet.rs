//! Local development network persisted to a JSON file.
//!
//! Bundles one mock coprocessor and one deployed quiz contract so that
//! successive CLI invocations see each other's transactions, the way a
//! local node keeps state between scripts.

use fhe_engine::mock::CoprocessorSnapshot;
use fhe_engine::{LocalWallet, MockCoprocessor, Signer};
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::rc::Rc;

use crate::local::{LocalQuiz, QuizSnapshot};
use crate::questions::{default_catalog, QuestionSpec};
use crate::Result;

/// Default location of the devnet state file.
pub const DEFAULT_STATE_FILE: &str = "cipherquiz-devnet.json";

/// Seed phrase for the deterministic development accounts.
const DEV_ACCOUNT_SEED: &str = "test test test test test test test test test test test junk";

/// Deterministic development account `index`.
///
/// The key is `SHA-256(seed || index)`; account 0 deploys the contract.
///
/// # Errors
/// Returns `LedgerError::Key` in the negligible case the digest is not a
/// valid secp256k1 scalar.
pub fn dev_account(index: u32) -> Result<LocalWallet> {
    let mut hasher = Sha256::new();
    hasher.update(DEV_ACCOUNT_SEED.as_bytes());
    hasher.update(index.to_be_bytes());
    let secret = SecretKey::from_slice(&hasher.finalize())?;
    Ok(LocalWallet::new(secret))
}

#[derive(Serialize, Deserialize)]
struct DevnetSnapshot {
    coprocessor: CoprocessorSnapshot,
    quiz: QuizSnapshot,
}

/// A coprocessor plus a deployed quiz contract.
#[derive(Debug, Clone)]
pub struct Devnet {
    engine: Rc<MockCoprocessor>,
    quiz: Rc<LocalQuiz>,
}

impl Devnet {
    /// Deploys a fresh quiz from development account 0.
    ///
    /// # Errors
    /// Returns an error if the deployer key cannot be derived or the catalog
    /// is invalid.
    pub fn deploy(catalog: &[QuestionSpec]) -> Result<Self> {
        let engine = Rc::new(MockCoprocessor::new());
        let deployer = dev_account(0)?.address();
        let quiz = LocalQuiz::deploy(engine.clone(), deployer, catalog)?;
        Ok(Self {
            engine,
            quiz: Rc::new(quiz),
        })
    }

    /// Loads a devnet saved with [`Devnet::save`].
    ///
    /// # Errors
    /// Returns `LedgerError::Io` or `LedgerError::Json`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let snapshot: DevnetSnapshot = serde_json::from_str(&text)?;
        let engine = Rc::new(MockCoprocessor::from_snapshot(snapshot.coprocessor));
        let quiz = LocalQuiz::from_snapshot(engine.clone(), snapshot.quiz);
        tracing::debug!(path = %path.display(), "loaded devnet state");
        Ok(Self {
            engine,
            quiz: Rc::new(quiz),
        })
    }

    /// Loads `path`, or deploys the default catalog if it does not exist.
    ///
    /// # Errors
    /// Propagates load and deploy errors.
    pub fn load_or_deploy(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "no devnet state, deploying a fresh quiz");
            Self::deploy(&default_catalog())
        }
    }

    /// Writes the devnet state to `path`.
    ///
    /// # Errors
    /// Returns `LedgerError::Io` or `LedgerError::Json`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = DevnetSnapshot {
            coprocessor: self.engine.snapshot(),
            quiz: self.quiz.snapshot(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
        tracing::debug!(path = %path.display(), "saved devnet state");
        Ok(())
    }

    /// The coprocessor.
    #[must_use]
    pub fn engine(&self) -> &Rc<MockCoprocessor> {
        &self.engine
    }

    /// The quiz contract.
    #[must_use]
    pub fn quiz(&self) -> &Rc<LocalQuiz> {
        &self.quiz
    }
}
