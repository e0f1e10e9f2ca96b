//! Question catalogs used at deploy time.

use serde::{Deserialize, Serialize};

/// A question as supplied to the deployer, including its answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSpec {
    /// Prompt text.
    pub prompt: String,
    /// The two option labels.
    pub options: [String; 2],
    /// Points for a correct answer.
    pub reward: u32,
    /// Index of the correct option. Stored encrypted on deploy.
    pub correct_option: u8,
}

impl QuestionSpec {
    /// Convenience constructor.
    #[must_use]
    pub fn new(prompt: &str, options: [&str; 2], reward: u32, correct_option: u8) -> Self {
        Self {
            prompt: prompt.to_string(),
            options: options.map(str::to_string),
            reward,
            correct_option,
        }
    }
}

/// The two-question catalog the quiz ships with.
#[must_use]
pub fn default_catalog() -> Vec<QuestionSpec> {
    vec![
        QuestionSpec::new(
            "Which studio originally created Minecraft?",
            ["Mojang", "Valve"],
            50,
            0,
        ),
        QuestionSpec::new(
            "In chess, which piece can jump over other pieces?",
            ["Knight", "Bishop"],
            100,
            0,
        ),
    ]
}
