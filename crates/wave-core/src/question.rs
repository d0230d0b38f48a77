use serde::{Deserialize, Serialize};

/// Question difficulty tier. Tiers drive both selection counts and scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Tier order used when building a deck: easy first, hard last.
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn scoring(self) -> TierScoring {
        match self {
            Difficulty::Easy => TierScoring {
                base: 50,
                max_penalty: 30,
            },
            Difficulty::Medium => TierScoring {
                base: 100,
                max_penalty: 60,
            },
            Difficulty::Hard => TierScoring {
                base: 150,
                max_penalty: 90,
            },
        }
    }
}

/// Base points for a correct answer and the maximum time penalty that can be
/// shaved off it. The penalty grows linearly with response time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierScoring {
    pub base: i32,
    pub max_penalty: i32,
}

/// Floor for any correct answer, whatever the response time.
pub const MIN_CORRECT_POINTS: i32 = 10;

/// A question as the server knows it, correct option included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub content: String,
    pub options: Vec<String>,
    pub correct_option: usize,
    pub difficulty: Difficulty,
}

/// The client-facing view of a question. The correct option is withheld until
/// the question result is broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientQuestion {
    pub id: String,
    pub content: String,
    pub options: Vec<String>,
    pub difficulty: Difficulty,
}

impl From<&Question> for ClientQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            content: q.content.clone(),
            options: q.options.clone(),
            difficulty: q.difficulty,
        }
    }
}

/// Points for one answer: base minus a linear time penalty, floored at
/// [`MIN_CORRECT_POINTS`]; wrong or missing answers score zero.
pub fn score_answer(
    difficulty: Difficulty,
    is_correct: bool,
    response_time_ms: u64,
    limit_ms: u64,
) -> i32 {
    if !is_correct || limit_ms == 0 {
        return 0;
    }
    let tier = difficulty.scoring();
    let elapsed_ratio = (response_time_ms.min(limit_ms) as f64) / (limit_ms as f64);
    let penalty = (tier.max_penalty as f64 * elapsed_ratio).round() as i32;
    (tier.base - penalty).max(MIN_CORRECT_POINTS)
}

/// One player's answer to one question. At most one record exists per
/// (wallet, question index); timeouts are synthesized with no selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub wallet_id: String,
    pub question_index: usize,
    pub selected_option: Option<usize>,
    pub response_time_ms: u64,
    pub is_correct: bool,
    pub points_awarded: i32,
}

impl AnswerRecord {
    /// Record synthesized when the deadline fires with no submission.
    pub fn timeout(wallet_id: impl Into<String>, question_index: usize, limit_ms: u64) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            question_index,
            selected_option: None,
            response_time_ms: limit_ms,
            is_correct: false,
            points_awarded: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn faster_correct_answer_scores_higher() {
        // 15s deadline, same difficulty: 2s beats 8s.
        let fast = score_answer(Difficulty::Easy, true, 2_000, 15_000);
        let slow = score_answer(Difficulty::Easy, true, 8_000, 15_000);
        assert!(fast > slow, "fast={fast} slow={slow}");
    }

    #[test]
    fn incorrect_answer_scores_zero() {
        assert_eq!(score_answer(Difficulty::Hard, false, 100, 15_000), 0);
    }

    #[test]
    fn slowest_correct_answer_stays_above_floor() {
        for d in Difficulty::ALL {
            let points = score_answer(d, true, 15_000, 15_000);
            assert!(points >= MIN_CORRECT_POINTS, "{d:?} scored {points}");
            assert!(points > 0);
        }
    }

    #[test]
    fn instant_answer_earns_full_base() {
        assert_eq!(score_answer(Difficulty::Medium, true, 0, 20_000), 100);
    }

    #[test]
    fn response_time_clamped_to_limit() {
        let at_limit = score_answer(Difficulty::Easy, true, 15_000, 15_000);
        let past_limit = score_answer(Difficulty::Easy, true, 60_000, 15_000);
        assert_eq!(at_limit, past_limit);
    }

    #[test]
    fn timeout_record_shape() {
        let rec = AnswerRecord::timeout("0xabc", 3, 15_000);
        assert_eq!(rec.selected_option, None);
        assert_eq!(rec.points_awarded, 0);
        assert!(!rec.is_correct);
        assert_eq!(rec.question_index, 3);
    }

    #[test]
    fn harder_tiers_pay_more_at_equal_speed() {
        let easy = score_answer(Difficulty::Easy, true, 5_000, 15_000);
        let medium = score_answer(Difficulty::Medium, true, 5_000, 15_000);
        let hard = score_answer(Difficulty::Hard, true, 5_000, 15_000);
        assert!(easy < medium && medium < hard);
    }

    proptest! {
        #[test]
        fn score_monotonically_non_increasing_in_time(
            t1 in 0u64..30_000,
            t2 in 0u64..30_000,
        ) {
            let (fast, slow) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
            for d in Difficulty::ALL {
                let a = score_answer(d, true, fast, 15_000);
                let b = score_answer(d, true, slow, 15_000);
                prop_assert!(a >= b);
                prop_assert!(b >= MIN_CORRECT_POINTS);
            }
        }
    }
}
