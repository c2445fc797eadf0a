//! Scoped scenario state.
//!
//! Each group runs with its own scope. A nested group's scope can read its
//! parent's entries through a shared borrow but writes only to itself; values
//! reach the parent only through explicit promotion.

use std::collections::HashMap;

use crate::error::StepFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    value: String,
    written_by: String,
}

/// An entry leaving a scope for its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promoted {
    pub key: String,
    pub value: String,
    pub written_by: String,
}

#[derive(Debug, Default)]
pub struct ScenarioState<'p> {
    parent: Option<&'p ScenarioState<'p>>,
    entries: HashMap<String, Entry>,
}

impl ScenarioState<'static> {
    pub fn root() -> Self {
        Self::default()
    }
}

impl<'p> ScenarioState<'p> {
    /// A nested scope that reads through to `self`.
    pub fn child(&self) -> ScenarioState<'_> {
        ScenarioState {
            parent: Some(self),
            entries: HashMap::new(),
        }
    }

    /// Look a key up in this scope, then in enclosing scopes.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(entry) => Some(&entry.value),
            None => self.parent.and_then(|parent| parent.get(key)),
        }
    }

    /// Which step wrote the visible value of `key`.
    pub fn writer_of(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(entry) => Some(&entry.written_by),
            None => self.parent.and_then(|parent| parent.writer_of(key)),
        }
    }

    /// Write `key` in this scope.
    ///
    /// The same writer may overwrite its own entry; any other writer gets a
    /// `StateConflict`. Parent entries are shadowed, never modified.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        written_by: impl Into<String>,
    ) -> Result<(), StepFailure> {
        let key = key.into();
        let written_by = written_by.into();
        if let Some(existing) = self.entries.get(&key) {
            if existing.written_by != written_by {
                return Err(StepFailure::StateConflict {
                    key,
                    owner: existing.written_by.clone(),
                });
            }
        }
        self.entries.insert(
            key,
            Entry {
                value: value.into(),
                written_by,
            },
        );
        Ok(())
    }

    /// Local entries for `keys`, in order. Keys this scope never wrote are skipped.
    pub fn promoted(&self, keys: &[String]) -> Vec<Promoted> {
        keys.iter()
            .filter_map(|key| {
                self.entries.get(key).map(|entry| Promoted {
                    key: key.clone(),
                    value: entry.value.clone(),
                    written_by: entry.written_by.clone(),
                })
            })
            .collect()
    }

    pub fn accept(&mut self, promoted: Vec<Promoted>) -> Result<(), StepFailure> {
        for entry in promoted {
            self.insert(entry.key, entry.value, entry.written_by)?;
        }
        Ok(())
    }

    /// Number of entries written in this scope alone.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
