// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Result recorder
//!
//! Writes are idempotent on `id`: recording an id again replaces the scores
//! but keeps any user feedback already attached to it.

use crate::interaction::{Interaction, UserFeedback};
use crate::EvalError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Sink for evaluated interactions
#[async_trait]
pub trait ResultRecorder: Send + Sync {
    /// Insert or replace the record for `interaction.id`
    async fn record(&self, interaction: &Interaction) -> Result<(), EvalError>;

    /// Append feedback to an existing record without touching other fields
    async fn attach_feedback(&self, id: &str, feedback: UserFeedback) -> Result<(), EvalError>;

    async fn get(&self, id: &str) -> Result<Option<Interaction>, EvalError>;
}

fn carry_feedback(previous: Vec<UserFeedback>, mut replacement: Interaction) -> Interaction {
    if !previous.is_empty() {
        let mut feedback = previous;
        feedback.append(&mut replacement.user_feedback);
        replacement.user_feedback = feedback;
    }
    replacement
}

/// Process-local recorder
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    records: DashMap<String, Interaction>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, sorted by id
    pub fn all(&self) -> Vec<Interaction> {
        let mut records: Vec<Interaction> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

#[async_trait]
impl ResultRecorder for InMemoryRecorder {
    async fn record(&self, interaction: &Interaction) -> Result<(), EvalError> {
        match self.records.entry(interaction.id.clone()) {
            Entry::Occupied(mut existing) => {
                let previous = std::mem::take(&mut existing.get_mut().user_feedback);
                existing.insert(carry_feedback(previous, interaction.clone()));
            }
            Entry::Vacant(slot) => {
                slot.insert(interaction.clone());
            }
        }
        Ok(())
    }

    async fn attach_feedback(&self, id: &str, feedback: UserFeedback) -> Result<(), EvalError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| EvalError::Recorder(format!("no record for interaction '{}'", id)))?;
        record.user_feedback.push(feedback);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Interaction>, EvalError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }
}

/// One pretty-printed JSON document per interaction, `<dir>/<id>.json`.
///
/// Files are written to a temporary name and renamed into place, so readers
/// never observe a partial record.
#[derive(Debug)]
pub struct JsonFileRecorder {
    dir: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonFileRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, EvalError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            EvalError::Recorder(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the record for `id`
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_name(id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<Interaction>, EvalError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                EvalError::Recorder(format!("corrupt record {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EvalError::Recorder(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write(&self, path: &Path, interaction: &Interaction) -> Result<(), EvalError> {
        let bytes = serde_json::to_vec_pretty(interaction)
            .map_err(|e| EvalError::Recorder(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| EvalError::Recorder(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            EvalError::Recorder(format!("cannot rename into {}: {}", path.display(), e))
        })?;

        debug!(interaction_id = %interaction.id, path = %path.display(), "Record written");
        Ok(())
    }
}

#[async_trait]
impl ResultRecorder for JsonFileRecorder {
    async fn record(&self, interaction: &Interaction) -> Result<(), EvalError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(&interaction.id);

        let record = match self.read(&path).await? {
            Some(previous) => carry_feedback(previous.user_feedback, interaction.clone()),
            None => interaction.clone(),
        };
        self.write(&path, &record).await
    }

    async fn attach_feedback(&self, id: &str, feedback: UserFeedback) -> Result<(), EvalError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(id);

        let mut record = self
            .read(&path)
            .await?
            .ok_or_else(|| EvalError::Recorder(format!("no record for interaction '{}'", id)))?;
        record.user_feedback.push(feedback);
        self.write(&path, &record).await
    }

    async fn get(&self, id: &str) -> Result<Option<Interaction>, EvalError> {
        self.read(&self.path_for(id)).await
    }
}

/// Keep `[A-Za-z0-9._-]`, percent-encode every other byte. Injective, so two
/// ids never share a file.
fn encode_file_name(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            // Dots are kept except at the start, so ids like ".." stay inside the directory
            b'.' if !out.is_empty() => out.push('.'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::{
        EvaluationMethod, EvaluationOutcome, MetricSources, MetricWeights, QualityScores,
        ScoreSource,
    };
    use chrono::Utc;

    fn interaction(id: &str, faithfulness: f64) -> Interaction {
        Interaction {
            id: id.to_string(),
            query: "How do I configure routing?".to_string(),
            response: "Edit settings.yaml.".to_string(),
            contexts: vec!["Routing lives in settings.yaml.".to_string()],
            evaluation_method: EvaluationMethod::Heuristic,
            backend_name: None,
            scores: QualityScores::from_metrics(
                Some(faithfulness),
                Some(0.5),
                Some(0.5),
                &MetricWeights::default(),
            ),
            sources: MetricSources::uniform(ScoreSource::Heuristic),
            outcome: EvaluationOutcome::HeuristicOnly,
            latency_ms: 2,
            error: None,
            evaluated_at: Utc::now(),
            user_feedback: vec![],
        }
    }

    fn feedback(rating: i8) -> UserFeedback {
        UserFeedback {
            rating: Some(rating),
            comment: None,
            submitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_overwrite_keeps_feedback() {
        let recorder = InMemoryRecorder::new();
        recorder.record(&interaction("a", 0.2)).await.unwrap();
        recorder.attach_feedback("a", feedback(1)).await.unwrap();
        recorder.record(&interaction("a", 0.9)).await.unwrap();

        let stored = recorder.get("a").await.unwrap().unwrap();
        assert_eq!(stored.scores.faithfulness, Some(0.9));
        assert_eq!(stored.user_feedback.len(), 1);
        assert_eq!(recorder.len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_for_unknown_id() {
        let recorder = InMemoryRecorder::new();
        let err = recorder.attach_feedback("ghost", feedback(-1)).await.unwrap_err();
        assert!(matches!(err, EvalError::Recorder(_)));
    }

    #[tokio::test]
    async fn test_feedback_leaves_scores_untouched() {
        let recorder = InMemoryRecorder::new();
        let original = interaction("b", 0.4);
        recorder.record(&original).await.unwrap();
        recorder.attach_feedback("b", feedback(1)).await.unwrap();
        recorder.attach_feedback("b", feedback(-1)).await.unwrap();

        let stored = recorder.get("b").await.unwrap().unwrap();
        assert_eq!(stored.scores, original.scores);
        assert_eq!(stored.evaluated_at, original.evaluated_at);
        assert_eq!(
            stored.user_feedback.iter().map(|f| f.rating).collect::<Vec<_>>(),
            vec![Some(1), Some(-1)]
        );
    }

    #[tokio::test]
    async fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonFileRecorder::new(dir.path()).unwrap();

        let record = interaction("conv-42/turn-3", 0.7);
        recorder.record(&record).await.unwrap();

        let path = recorder.path_for("conv-42/turn-3");
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
        let stored = recorder.get("conv-42/turn-3").await.unwrap().unwrap();
        assert_eq!(stored.id, record.id);
        assert_eq!(stored.contexts, record.contexts);
        assert_eq!(stored.evaluated_at, record.evaluated_at);
        assert!((stored.scores.overall.unwrap() - record.scores.overall.unwrap()).abs() < 1e-12);
        assert_eq!(recorder.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_file_overwrite_keeps_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonFileRecorder::new(dir.path()).unwrap();

        recorder.record(&interaction("x", 0.1)).await.unwrap();
        recorder.attach_feedback("x", feedback(1)).await.unwrap();
        recorder.record(&interaction("x", 0.8)).await.unwrap();

        let stored = recorder.get("x").await.unwrap().unwrap();
        assert_eq!(stored.scores.faithfulness, Some(0.8));
        assert_eq!(stored.user_feedback.len(), 1);

        // No temporary files are left behind
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_file_names_are_distinct_and_contained() {
        assert_eq!(encode_file_name("abc-1_2.v3"), "abc-1_2.v3");
        assert_eq!(encode_file_name("a/b"), "a%2Fb");
        assert_ne!(encode_file_name("a/b"), encode_file_name("a_b"));
        assert_ne!(encode_file_name("a%2Fb"), encode_file_name("a/b"));
        assert_eq!(encode_file_name(".."), "%2E.");
    }
}
