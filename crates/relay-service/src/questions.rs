//! Question list lookup.
//!
//! Question content is owned by an external service; the relay only reads
//! an ordered list of question texts when a room is created. The store
//! is a trait so deployments can back it with whatever that service
//! exposes. [`InMemoryQuestionStore`] covers development and tests and can
//! be seeded from a JSON file mapping list ids to question arrays:
//!
//! ```json
//! { "algorithms-101": ["What is a heap?", "Explain quicksort."] }
//! ```

use crate::errors::RelayError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// Read access to question lists by id.
pub trait QuestionListStore: Send + Sync {
    /// Ordered question texts for `list_id`, or `None` if unknown.
    fn get(&self, list_id: &str) -> Result<Option<Vec<String>>, RelayError>;
}

/// Question lists held in memory.
#[derive(Debug, Default)]
pub struct InMemoryQuestionStore {
    lists: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryQuestionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with_list(self, list_id: impl Into<String>, questions: Vec<String>) -> Self {
        self.insert(list_id, questions);
        self
    }

    pub fn insert(&self, list_id: impl Into<String>, questions: Vec<String>) {
        if let Ok(mut lists) = self.lists.write() {
            lists.insert(list_id.into(), questions);
        }
    }

    /// Load lists from a JSON object of `id -> [question, ...]`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RelayError::QuestionList(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RelayError> {
        let lists: HashMap<String, Vec<String>> = serde_json::from_str(raw)
            .map_err(|e| RelayError::QuestionList(format!("invalid question list JSON: {e}")))?;
        Ok(Self {
            lists: RwLock::new(lists),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.read().map(|l| l.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QuestionListStore for InMemoryQuestionStore {
    fn get(&self, list_id: &str) -> Result<Option<Vec<String>>, RelayError> {
        let lists = self
            .lists
            .read()
            .map_err(|_| RelayError::QuestionList("question store lock poisoned".to_string()))?;
        Ok(lists.get(list_id).cloned())
    }
}
