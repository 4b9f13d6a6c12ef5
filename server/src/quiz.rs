//! Live quiz state and result aggregation.
//!
//! A room holds at most one active quiz. Creating a quiz clears any
//! prior answers in the same step; reveal and cancel both clear the
//! quiz and its answers, reveal after computing the summary.

use shared::{ConnId, FastestAnswer, QuizType, ServerEvent};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Quiz {
    pub id: u64,
    pub question: String,
    pub quiz_type: QuizType,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub time_limit: u64,
    pub created_at: u64,
}

impl Quiz {
    /// Builds a quiz from a teacher's send_quiz payload, filling the
    /// omitted fields. The id is derived from the creation timestamp.
    pub fn new(
        question: String,
        quiz_type: Option<QuizType>,
        options: Option<Vec<String>>,
        correct_answer: String,
        time_limit: Option<u64>,
        now_ms: u64,
    ) -> Self {
        let quiz_type = quiz_type.unwrap_or(QuizType::Ox);
        let options = options.unwrap_or_else(|| match quiz_type {
            QuizType::Ox => vec!["O".to_string(), "X".to_string()],
            QuizType::Choice => Vec::new(),
        });

        Self {
            id: now_ms,
            question,
            quiz_type,
            options,
            correct_answer,
            time_limit: time_limit.unwrap_or(shared::DEFAULT_QUIZ_TIME_LIMIT),
            created_at: now_ms,
        }
    }

    pub fn broadcast_event(&self) -> ServerEvent {
        ServerEvent::QuizBroadcast {
            id: self.id,
            question: self.question.clone(),
            quiz_type: self.quiz_type,
            options: self.options.clone(),
            correct_answer: self.correct_answer.clone(),
            time_limit: self.time_limit,
            created_at: self.created_at,
        }
    }
}

/// One student's submitted answer. Later submissions from the same
/// connection overwrite the earlier ones.
#[derive(Debug, Clone)]
pub struct QuizAnswer {
    pub student_name: String,
    pub answer: String,
    pub elapsed_ms: u64,
}

/// Computes the reveal summary: per-option tally, correct count and
/// rate (one-decimal percentage string, `"0"` with no submissions),
/// and the fastest correct responder if any.
pub fn reveal(
    quiz: &Quiz,
    answers: &HashMap<ConnId, QuizAnswer>,
    total_students: usize,
) -> ServerEvent {
    let mut tally: HashMap<String, usize> = HashMap::new();
    for answer in answers.values() {
        *tally.entry(answer.answer.clone()).or_insert(0) += 1;
    }

    let total_answered = answers.len();
    let correct_count = answers
        .values()
        .filter(|a| a.answer == quiz.correct_answer)
        .count();

    let correct_rate = if total_answered == 0 {
        "0".to_string()
    } else {
        format!(
            "{:.1}",
            correct_count as f64 * 100.0 / total_answered as f64
        )
    };

    let fastest = answers
        .iter()
        .filter(|(_, a)| a.answer == quiz.correct_answer)
        .min_by_key(|(_, a)| a.elapsed_ms)
        .map(|(id, a)| FastestAnswer {
            student_id: *id,
            student_name: a.student_name.clone(),
            time_ms: a.elapsed_ms,
        });

    ServerEvent::QuizResults {
        quiz_id: quiz.id,
        question: quiz.question.clone(),
        correct_answer: quiz.correct_answer.clone(),
        tally,
        total_answered,
        total_students,
        correct_count,
        correct_rate,
        fastest,
    }
}
