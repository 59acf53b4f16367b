//! Typed namespace over the flat KV store.
//!
//! One assignment spans several sibling keys that share the assignment id as
//! a prefix:
//!   `{id}-name`          display name (string)
//!   `{id}-questions`     question roster
//!   `{id}-students`      student roster
//!   `{id}-results`       grading table
//!   `{id}-chat`          chat histories keyed by "question_id:student_id"
//!   `{id}-grade-status`  background grading job state
//!
//! The `{id}-name` entry doubles as the existence marker: listing scans for
//! it, and an assignment without one is treated as deleted.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::roster::{ChatTurn, GradingTable, Question, Student, new_assignment_id};
use crate::store::KvStore;

const ASSIGNMENT_PREFIX: &str = "asg-";
const NAME_SUFFIX: &str = "-name";

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// State of the background grading job, persisted so the client can poll it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeJobStatus {
    pub status: JobStatus,
    /// Human-readable progress line, e.g. which pair is being graded.
    pub detail: String,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
    #[serde(rename = "completedPairs")]
    pub completed_pairs: usize,
    #[serde(rename = "totalPairs")]
    pub total_pairs: usize,
}

impl GradeJobStatus {
    pub fn pending(total_pairs: usize) -> Self {
        Self {
            status: JobStatus::Pending,
            detail: "Queued".to_string(),
            error_message: None,
            completed_pairs: 0,
            total_pairs,
        }
    }
}

#[derive(Clone)]
pub struct AssignmentStore {
    kv: KvStore,
}

impl AssignmentStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub async fn create(&self, name: &str) -> Result<String> {
        let id = new_assignment_id();
        self.set_name(&id, name).await?;
        Ok(id)
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.kv.get(&key(id, NAME_SUFFIX)).await?.is_some())
    }

    /// All assignments, newest first. Ordering follows the millisecond
    /// timestamp embedded in the id.
    pub async fn list(&self) -> Result<Vec<AssignmentSummary>> {
        let keys = self.kv.keys_with_suffix(NAME_SUFFIX).await?;
        let mut summaries = Vec::new();

        for store_key in keys {
            if !store_key.starts_with(ASSIGNMENT_PREFIX) {
                continue;
            }
            let Some(id) = store_key.strip_suffix(NAME_SUFFIX) else {
                continue;
            };
            if let Some(value) = self.kv.get(&store_key).await? {
                if let Some(name) = value.as_str() {
                    summaries.push(AssignmentSummary {
                        id: id.to_string(),
                        name: name.to_string(),
                    });
                }
            }
        }

        summaries.sort_by_key(|summary| std::cmp::Reverse(id_timestamp(&summary.id)));
        Ok(summaries)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.kv.remove_prefix(&format!("{id}-")).await
    }

    pub async fn name(&self, id: &str) -> Result<Option<String>> {
        Ok(self
            .kv
            .get(&key(id, NAME_SUFFIX))
            .await?
            .and_then(|value| value.as_str().map(str::to_string)))
    }

    pub async fn set_name(&self, id: &str, name: &str) -> Result<()> {
        self.kv
            .put(&key(id, NAME_SUFFIX), serde_json::Value::from(name))
            .await
    }

    pub async fn questions(&self, id: &str) -> Result<Vec<Question>> {
        self.get_typed(id, "-questions").await
    }

    pub async fn set_questions(&self, id: &str, questions: &[Question]) -> Result<()> {
        self.put_typed(id, "-questions", questions).await
    }

    pub async fn students(&self, id: &str) -> Result<Vec<Student>> {
        self.get_typed(id, "-students").await
    }

    pub async fn set_students(&self, id: &str, students: &[Student]) -> Result<()> {
        self.put_typed(id, "-students", students).await
    }

    pub async fn results(&self, id: &str) -> Result<GradingTable> {
        self.get_typed(id, "-results").await
    }

    pub async fn set_results(&self, id: &str, results: &GradingTable) -> Result<()> {
        self.put_typed(id, "-results", results).await
    }

    pub async fn chat_history(
        &self,
        id: &str,
        question_id: &str,
        student_id: &str,
    ) -> Result<Vec<ChatTurn>> {
        let all: HashMap<String, Vec<ChatTurn>> = self.get_typed(id, "-chat").await?;
        Ok(all
            .get(&pair_key(question_id, student_id))
            .cloned()
            .unwrap_or_default())
    }

    pub async fn set_chat_history(
        &self,
        id: &str,
        question_id: &str,
        student_id: &str,
        turns: &[ChatTurn],
    ) -> Result<()> {
        let mut all: HashMap<String, Vec<ChatTurn>> = self.get_typed(id, "-chat").await?;
        all.insert(pair_key(question_id, student_id), turns.to_vec());
        self.put_typed(id, "-chat", &all).await
    }

    /// Drops every chat history for the assignment. Called when the rosters
    /// or results they refer to are replaced.
    pub async fn clear_chat(&self, id: &str) -> Result<()> {
        self.kv.remove(&key(id, "-chat")).await
    }

    pub async fn grade_status(&self, id: &str) -> Result<Option<GradeJobStatus>> {
        match self.kv.get(&key(id, "-grade-status")).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set_grade_status(&self, id: &str, status: &GradeJobStatus) -> Result<()> {
        self.put_typed(id, "-grade-status", status).await
    }

    async fn get_typed<T: DeserializeOwned + Default>(&self, id: &str, suffix: &str) -> Result<T> {
        match self.kv.get(&key(id, suffix)).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(T::default()),
        }
    }

    async fn put_typed<T: Serialize + ?Sized>(&self, id: &str, suffix: &str, value: &T) -> Result<()> {
        self.kv
            .put(&key(id, suffix), serde_json::to_value(value)?)
            .await
    }
}

fn key(id: &str, suffix: &str) -> String {
    format!("{id}{suffix}")
}

fn pair_key(question_id: &str, student_id: &str) -> String {
    format!("{question_id}:{student_id}")
}

fn id_timestamp(id: &str) -> i64 {
    id.strip_prefix(ASSIGNMENT_PREFIX)
        .and_then(|millis| millis.parse::<i64>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{ChatRole, GradingResult, example_roster};

    fn store() -> AssignmentStore {
        AssignmentStore::new(KvStore::memory())
    }

    fn result_with_score(score: f64) -> GradingResult {
        GradingResult {
            analysis: Vec::new(),
            overall_feedback: String::new(),
            score,
            highlighted_answer: String::new(),
        }
    }

    #[tokio::test]
    async fn rosters_round_trip_through_their_own_keys() {
        let store = store();
        let id = store.create("Biology quiz").await.unwrap();
        assert!(store.exists(&id).await.unwrap());
        assert_eq!(store.name(&id).await.unwrap().as_deref(), Some("Biology quiz"));

        let (questions, students) = example_roster();
        store.set_questions(&id, &questions).await.unwrap();
        store.set_students(&id, &students).await.unwrap();

        assert_eq!(store.questions(&id).await.unwrap().len(), 2);
        assert_eq!(store.students(&id).await.unwrap().len(), 2);
        assert!(store.results(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_skips_foreign_keys() {
        let store = store();
        store.kv.put("asg-100-name", "old".into()).await.unwrap();
        store.kv.put("asg-200-name", "new".into()).await.unwrap();
        store.kv.put("other-name", "noise".into()).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "asg-200");
        assert_eq!(listed[1].id, "asg-100");
    }

    #[tokio::test]
    async fn delete_removes_every_satellite_key() {
        let store = store();
        let id = store.create("doomed").await.unwrap();
        let (questions, _) = example_roster();
        store.set_questions(&id, &questions).await.unwrap();
        let mut results = GradingTable::default();
        results.insert("q1", "s1", result_with_score(7.0));
        store.set_results(&id, &results).await.unwrap();

        store.delete(&id).await.unwrap();
        assert!(!store.exists(&id).await.unwrap());
        assert!(store.questions(&id).await.unwrap().is_empty());
        assert!(store.results(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replacing_results_drops_every_prior_entry() {
        let store = store();
        let id = store.create("regraded").await.unwrap();
        let mut results = GradingTable::default();
        results.insert("q1", "s1", result_with_score(7.0));
        results.insert("q2", "s2", result_with_score(3.0));
        store.set_results(&id, &results).await.unwrap();

        store
            .set_results(&id, &GradingTable::default())
            .await
            .unwrap();
        assert!(store.results(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_histories_are_isolated_per_pair() {
        let store = store();
        let id = store.create("chatty").await.unwrap();
        let turns = vec![ChatTurn {
            role: ChatRole::User,
            message: "Raise the score.".to_string(),
        }];
        store.set_chat_history(&id, "q1", "s1", &turns).await.unwrap();

        assert_eq!(store.chat_history(&id, "q1", "s1").await.unwrap().len(), 1);
        assert!(store.chat_history(&id, "q1", "s2").await.unwrap().is_empty());
        assert!(store.chat_history(&id, "q2", "s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grade_status_round_trips() {
        let store = store();
        let id = store.create("graded").await.unwrap();
        assert!(store.grade_status(&id).await.unwrap().is_none());

        let mut status = GradeJobStatus::pending(4);
        status.status = JobStatus::Processing;
        status.completed_pairs = 2;
        status.detail = "Grading q2 for Alice".to_string();
        store.set_grade_status(&id, &status).await.unwrap();

        let loaded = store.grade_status(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.completed_pairs, 2);
        assert_eq!(loaded.total_pairs, 4);
    }
}
