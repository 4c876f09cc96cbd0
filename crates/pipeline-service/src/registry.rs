//! Named sequence registry
//!
//! Sequences are stored type-erased and recovered by downcasting to
//! `ContextualSequence<I>`. Lookups through a [`SequenceKey`] carry the
//! input type, so a mismatch is reported instead of panicking.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pipeline_engine::{ContextValue, ContextualSequence, SequenceContext, SequenceKey};

use crate::error::{Result, ServiceError};

struct RegisteredSequence {
    input_type: &'static str,
    sequence: Arc<dyn Any + Send + Sync>,
}

/// Thread-safe map from sequence id to sequence
#[derive(Default)]
pub struct SequenceRegistry {
    sequences: RwLock<HashMap<String, RegisteredSequence>>,
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sequence under its own key
    ///
    /// Fails if the id is taken; an existing entry is never replaced.
    pub fn register<I>(
        &self,
        sequence: ContextualSequence<I>,
    ) -> Result<SequenceKey<I, SequenceContext>>
    where
        I: ContextValue,
    {
        let key = sequence.key().clone();
        let mut sequences = self.sequences.write();
        if sequences.contains_key(key.id()) {
            return Err(ServiceError::AlreadyRegistered(key.id().to_string()));
        }
        sequences.insert(
            key.id().to_string(),
            RegisteredSequence {
                input_type: type_name::<I>(),
                sequence: Arc::new(sequence),
            },
        );
        log::debug!("Registered sequence {}", key);
        Ok(key)
    }

    /// Look up a sequence by id, checking its input type
    pub fn get<I>(&self, id: &str) -> Result<Arc<ContextualSequence<I>>>
    where
        I: ContextValue,
    {
        let sequences = self.sequences.read();
        let entry = sequences
            .get(id)
            .ok_or_else(|| ServiceError::UnknownSequence(id.to_string()))?;
        Arc::clone(&entry.sequence)
            .downcast::<ContextualSequence<I>>()
            .map_err(|_| ServiceError::SequenceTypeMismatch {
                id: id.to_string(),
                registered: entry.input_type,
                requested: type_name::<I>(),
            })
    }

    /// Look up the sequence a key was issued for
    pub fn get_by_key<I>(
        &self,
        key: &SequenceKey<I, SequenceContext>,
    ) -> Result<Arc<ContextualSequence<I>>>
    where
        I: ContextValue,
    {
        self.get(key.id())
    }

    /// Remove a sequence; returns whether one was registered
    pub fn unregister(&self, id: &str) -> bool {
        self.sequences.write().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sequences.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sequences.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.read().is_empty()
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sequences.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
