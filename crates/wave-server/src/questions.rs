use std::collections::HashMap;
use std::path::Path;

use rand::seq::SliceRandom;
use serde::Deserialize;
use wave_core::question::{Difficulty, Question};
use wave_core::room::RoomSettings;

/// Pool of questions grouped by difficulty, loaded once at startup and
/// shared read-only across rooms.
pub struct QuestionBank {
    by_tier: HashMap<Difficulty, Vec<Question>>,
}

#[derive(Deserialize)]
struct QuestionFile {
    questions: Vec<Question>,
}

#[derive(Debug)]
pub enum BankError {
    Io(std::io::Error),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for BankError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BankError::Io(e) => write!(f, "failed to read question file: {e}"),
            BankError::Parse(e) => write!(f, "failed to parse question file: {e}"),
            BankError::Invalid(e) => write!(f, "invalid question: {e}"),
        }
    }
}

impl std::error::Error for BankError {}

impl QuestionBank {
    pub fn from_questions(questions: Vec<Question>) -> Result<Self, BankError> {
        let mut by_tier: HashMap<Difficulty, Vec<Question>> = HashMap::new();
        for q in questions {
            if q.options.len() < 2 {
                return Err(BankError::Invalid(format!(
                    "question {} has fewer than two options",
                    q.id
                )));
            }
            if q.correct_option >= q.options.len() {
                return Err(BankError::Invalid(format!(
                    "question {} correct option {} out of range",
                    q.id, q.correct_option
                )));
            }
            by_tier.entry(q.difficulty).or_default().push(q);
        }
        Ok(Self { by_tier })
    }

    /// Load a TOML question file (`[[questions]]` tables).
    pub fn load(path: &Path) -> Result<Self, BankError> {
        let content = std::fs::read_to_string(path).map_err(BankError::Io)?;
        let file: QuestionFile =
            toml::from_str(&content).map_err(|e| BankError::Parse(e.to_string()))?;
        Self::from_questions(file.questions)
    }

    /// Load from `path` when it exists, otherwise fall back to the built-in
    /// demo set so the server always has something to serve.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load(path) {
                Ok(bank) => {
                    tracing::info!(path = %path.display(), "Loaded question bank");
                    return bank;
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Falling back to built-in questions");
                },
            }
        } else {
            tracing::info!(path = %path.display(), "No question file found, using built-in questions");
        }
        Self::from_questions(builtin_questions()).expect("built-in questions are valid")
    }

    pub fn available(&self, difficulty: Difficulty) -> usize {
        self.by_tier.get(&difficulty).map_or(0, Vec::len)
    }

    /// Draw up to `count` random questions from one tier, without repeats.
    pub fn draw(&self, difficulty: Difficulty, count: usize) -> Vec<Question> {
        let Some(pool) = self.by_tier.get(&difficulty) else {
            return Vec::new();
        };
        let mut indices: Vec<usize> = (0..pool.len()).collect();
        indices.shuffle(&mut rand::rng());
        indices
            .into_iter()
            .take(count)
            .map(|i| pool[i].clone())
            .collect()
    }

    /// Assemble a game deck per the room settings, easy tier first. Tiers
    /// short on questions contribute what they have.
    pub fn build_deck(&self, settings: &RoomSettings) -> Vec<Question> {
        let mut deck = Vec::with_capacity(settings.total_questions());
        for tier in Difficulty::ALL {
            let wanted = settings.count_for(tier);
            let drawn = self.draw(tier, wanted);
            if drawn.len() < wanted {
                tracing::warn!(
                    tier = ?tier,
                    wanted,
                    available = drawn.len(),
                    "Question tier short, deck will be smaller than configured"
                );
            }
            deck.extend(drawn);
        }
        deck
    }
}

fn builtin_questions() -> Vec<Question> {
    let q = |id: &str, content: &str, options: &[&str], correct: usize, difficulty| Question {
        id: id.to_string(),
        content: content.to_string(),
        options: options.iter().map(|s| s.to_string()).collect(),
        correct_option: correct,
        difficulty,
    };
    vec![
        q(
            "easy-001",
            "Which planet is closest to the sun?",
            &["Venus", "Mercury", "Mars", "Earth"],
            1,
            Difficulty::Easy,
        ),
        q(
            "easy-002",
            "How many sides does a hexagon have?",
            &["Five", "Six", "Seven", "Eight"],
            1,
            Difficulty::Easy,
        ),
        q(
            "easy-003",
            "What is the chemical symbol for water?",
            &["CO2", "H2O", "NaCl", "O2"],
            1,
            Difficulty::Easy,
        ),
        q(
            "easy-004",
            "Which ocean is the largest?",
            &["Atlantic", "Indian", "Pacific", "Arctic"],
            2,
            Difficulty::Easy,
        ),
        q(
            "easy-005",
            "What color do you get by mixing blue and yellow?",
            &["Purple", "Orange", "Green", "Brown"],
            2,
            Difficulty::Easy,
        ),
        q(
            "easy-006",
            "How many minutes are in two hours?",
            &["60", "90", "120", "150"],
            2,
            Difficulty::Easy,
        ),
        q(
            "med-001",
            "In which year did the first person walk on the moon?",
            &["1965", "1969", "1972", "1975"],
            1,
            Difficulty::Medium,
        ),
        q(
            "med-002",
            "Which element has the atomic number 6?",
            &["Oxygen", "Nitrogen", "Carbon", "Helium"],
            2,
            Difficulty::Medium,
        ),
        q(
            "med-003",
            "What is the capital of Australia?",
            &["Sydney", "Melbourne", "Canberra", "Perth"],
            2,
            Difficulty::Medium,
        ),
        q(
            "med-004",
            "Which data structure uses first-in, first-out ordering?",
            &["Stack", "Queue", "Tree", "Graph"],
            1,
            Difficulty::Medium,
        ),
        q(
            "hard-001",
            "What is the time complexity of binary search?",
            &["O(n)", "O(n log n)", "O(log n)", "O(1)"],
            2,
            Difficulty::Hard,
        ),
        q(
            "hard-002",
            "Which cryptographic hash function produces a 256-bit digest?",
            &["MD5", "SHA-1", "SHA-256", "CRC32"],
            2,
            Difficulty::Hard,
        ),
        q(
            "hard-003",
            "In which decade was the ARPANET first deployed?",
            &["1950s", "1960s", "1970s", "1980s"],
            1,
            Difficulty::Hard,
        ),
    ]
}
