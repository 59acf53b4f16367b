use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub mod extract;
pub mod parse;

/// One question of an assignment. Field names mirror the persisted JSON layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Empty on newly submitted questions; the server mints an id before
    /// persisting.
    #[serde(default)]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub rubric: String,
    #[serde(default)]
    pub keywords: String,
    /// Upper bound for the score shown in the UI. Older persisted rosters
    /// predate this field, so absence falls back to a default.
    #[serde(rename = "maxPoints", default = "default_max_points")]
    pub max_points: f64,
}

fn default_max_points() -> f64 {
    10.0
}

/// One student with answers aligned by position to the question roster:
/// `answers[i]` corresponds to `questions[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub answers: Vec<String>,
}

/// Feedback polarity of an analysis segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// A noteworthy verbatim substring of an answer, as identified by the grading
/// collaborator. The id is assigned caller-side after the LLM call so it stays
/// stable across re-renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSegment {
    pub id: String,
    pub segment: String,
    pub comment: String,
    pub sentiment: Sentiment,
}

/// Grading output for one (question, student) pair. `highlighted_answer` is
/// derived from the plain answer plus `analysis` and can always be rebuilt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    pub analysis: Vec<AnalysisSegment>,
    #[serde(rename = "overallFeedback")]
    pub overall_feedback: String,
    pub score: f64,
    #[serde(rename = "highlightedAnswer")]
    pub highlighted_answer: String,
}

/// Result cache keyed `[question_id][student_id]`. Cleared wholesale when a
/// grading pass restarts, updated per pair during chat refinement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GradingTable(pub HashMap<String, HashMap<String, GradingResult>>);

impl GradingTable {
    pub fn get(&self, question_id: &str, student_id: &str) -> Option<&GradingResult> {
        self.0.get(question_id).and_then(|row| row.get(student_id))
    }

    pub fn insert(&mut self, question_id: &str, student_id: &str, result: GradingResult) {
        self.0
            .entry(question_id.to_string())
            .or_default()
            .insert(student_id.to_string(), result);
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|row| row.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub message: String,
}

/// Millisecond wall-clock component used in generated ids. Ids are unique only
/// in practice; they are never used for ordering, only lookup.
pub fn timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn new_assignment_id() -> String {
    format!("asg-{}", timestamp_millis())
}

pub fn new_question_id() -> String {
    format!("q{}", timestamp_millis())
}

pub fn new_student_id(index: usize) -> String {
    format!("s{}-{}", index, timestamp_millis())
}

pub fn new_segment_id(index: usize) -> String {
    format!("segment-{}-{}", index, timestamp_millis())
}

/// Built-in sample roster for trying the grader without entering data.
pub fn example_roster() -> (Vec<Question>, Vec<Student>) {
    let questions = vec![
        Question {
            id: "q1".to_string(),
            text: "Explain the process of photosynthesis.".to_string(),
            rubric: "The explanation should be clear, accurate, and mention the roles of \
                     sunlight, water, carbon dioxide, chlorophyll, and the production of \
                     glucose and oxygen. Grading is out of 10 points."
                .to_string(),
            keywords: "sunlight, water, carbon dioxide, chlorophyll, glucose, oxygen".to_string(),
            max_points: 10.0,
        },
        Question {
            id: "q2".to_string(),
            text: "What is the primary function of the mitochondria in a cell?".to_string(),
            rubric: "The answer must state that mitochondria are responsible for generating \
                     most of the cell's supply of adenosine triphosphate (ATP), used as a \
                     source of chemical energy. Grading is out of 5 points."
                .to_string(),
            keywords: "ATP, energy, powerhouse, cellular respiration".to_string(),
            max_points: 5.0,
        },
    ];

    let students = vec![
        Student {
            id: "s1".to_string(),
            name: "Alice".to_string(),
            answers: vec![
                "Photosynthesis is how plants eat. They take in sunlight and water through \
                 their roots, and CO2 from the air. This happens in the leaves, which are \
                 green because of chlorophyll. The plant then makes sugar for food and \
                 releases oxygen for us to breathe."
                    .to_string(),
                "The mitochondria is the powerhouse of the cell, it makes energy.".to_string(),
            ],
        },
        Student {
            id: "s2".to_string(),
            name: "Bob".to_string(),
            answers: vec![
                "Plants use photosynthesis to make food from the sun. Chlorophyll is \
                 important. They take in CO2 and release O2."
                    .to_string(),
                "Mitochondria produce ATP through a process called cellular respiration, \
                 providing the main energy source for the cell."
                    .to_string(),
            ],
        },
    ];

    (questions, students)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_points_defaults_when_absent() {
        let question: Question = serde_json::from_str(
            r#"{"id":"q1","text":"What is DNA?","rubric":"","keywords":""}"#,
        )
        .unwrap();
        assert_eq!(question.max_points, 10.0);
    }

    #[test]
    fn grading_result_uses_persisted_field_names() {
        let result = GradingResult {
            analysis: Vec::new(),
            overall_feedback: "Solid answer.".to_string(),
            score: 8.0,
            highlighted_answer: "text".to_string(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("overallFeedback").is_some());
        assert!(value.get("highlightedAnswer").is_some());
    }

    #[test]
    fn example_roster_is_aligned() {
        let (questions, students) = example_roster();
        for student in &students {
            assert_eq!(student.answers.len(), questions.len());
        }
    }

    #[test]
    fn grading_table_round_trips_by_pair() {
        let mut table = GradingTable::default();
        assert!(table.is_empty());
        table.insert(
            "q1",
            "s1",
            GradingResult {
                analysis: Vec::new(),
                overall_feedback: String::new(),
                score: 5.0,
                highlighted_answer: String::new(),
            },
        );
        assert!(table.get("q1", "s1").is_some());
        assert!(table.get("q1", "s2").is_none());
        assert!(!table.is_empty());
    }
}
