//! Per-run scratch state shared by the stages of one run
//!
//! A fresh `RunContext` is created for every run and dropped with it.
//! Nothing here is persisted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use scribe_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Well-known context keys
pub mod keys {
    /// The user's request, set by the Analyst
    pub const ORIGINAL_QUERY: &str = "original_query";
    /// Requirements the Developer generates against
    pub const REQUIREMENTS: &str = "requirements";
    /// Base generation prompt, written once per run
    pub const DEVELOPER_PROMPT: &str = "developer_prompt";
    /// Most recent generation prompt, overwritten each attempt
    pub const LAST_PROMPT: &str = "last_prompt";
    /// Every generation prompt in order
    pub const PROMPT_HISTORY: &str = "prompt_history";
    /// Number of code generation attempts so far
    pub const DEVELOPER_ATTEMPTS: &str = "developer_attempts";
    /// Reviewer comments or execution error behind the latest regeneration
    pub const LAST_FEEDBACK: &str = "last_feedback";
}

/// Key/value state scoped to a single run
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    values: HashMap<String, Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            values: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Store a value, replacing any previous one
    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        self.values
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Store a value only if the key is unset; returns whether it was stored
    pub fn set_once(&mut self, key: &str, value: impl Serialize) -> Result<bool> {
        if self.values.contains_key(key) {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }

    /// Push onto the JSON array under `key`, creating it if needed
    ///
    /// A non-array value already stored under `key` becomes the first element.
    pub fn append(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        match self.values.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, value]);
            }
            None => {
                self.values.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
        Ok(())
    }

    /// Add one to the counter under `key` and return the new count
    pub fn increment(&mut self, key: &str) -> u64 {
        let next = self.get(key).and_then(Value::as_u64).unwrap_or(0) + 1;
        self.values.insert(key.to_string(), Value::from(next));
        next
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Deserialize the value under `key`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.values.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
