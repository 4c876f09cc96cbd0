//! Immutable typed context threaded through contextual sequences
//!
//! A [`SequenceContext`] maps [`NodeKey`] ids to serialized values, keeps
//! keys in insertion order and never changes once built: `put`, `merge`
//! and `remove` return a new context and leave the receiver untouched.
//! Collisions are resolved through the context's [`TypeCombinerFactory`].

mod combiner;
mod execution_id;
mod key;

pub use combiner::{
    concat_arrays, union_arrays, union_objects, CombineFn, EqualityFn, StoredValue,
    TypeCombinerFactory, ValueKind,
};
pub use execution_id::ExecutionId;
pub use key::{NodeKey, SequenceKey, INITIAL_KEY_ID};

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

type Entries = IndexMap<String, StoredValue>;

/// Anything that can be written to a context
///
/// Values are serialized for storage and persistence, read back by type,
/// and compared with `PartialEq` when an unregistered collision has to
/// decide whether both sides are equal.
pub trait ContextValue: Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static {}

impl<T> ContextValue for T where T: Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static {}

/// Immutable, typed, mergeable execution state
///
/// Clones share storage; writes copy on demand.
#[derive(Clone)]
pub struct SequenceContext {
    execution_id: ExecutionId,
    entries: Arc<Entries>,
    /// What this context wrote since it was derived as a fork child
    contributions: Option<Arc<Entries>>,
    combiners: Arc<TypeCombinerFactory>,
}

impl SequenceContext {
    /// An empty context
    pub fn new(execution_id: ExecutionId, combiners: Arc<TypeCombinerFactory>) -> Self {
        Self {
            execution_id,
            entries: Arc::new(IndexMap::new()),
            contributions: None,
            combiners,
        }
    }

    /// An empty context with a fresh root id and the default combiners
    pub fn empty() -> Self {
        Self::new(
            ExecutionId::new_root(),
            Arc::new(TypeCombinerFactory::default()),
        )
    }

    /// A fresh root context holding one value
    pub fn root<T>(key: &NodeKey<T>, value: T, combiners: Arc<TypeCombinerFactory>) -> Result<Self>
    where
        T: ContextValue,
    {
        Self::new(ExecutionId::new_root(), combiners).put(key, value)
    }

    /// A fresh root context with `value` stored under the reserved initial key
    pub fn from_initial_input<T>(value: T) -> Result<Self>
    where
        T: ContextValue,
    {
        Self::root(
            &NodeKey::initial(),
            value,
            Arc::new(TypeCombinerFactory::default()),
        )
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn combiners(&self) -> &Arc<TypeCombinerFactory> {
        &self.combiners
    }

    /// The same entries resolved with a different combiner set
    pub fn with_combiners(&self, combiners: Arc<TypeCombinerFactory>) -> Self {
        Self {
            combiners,
            ..self.clone()
        }
    }

    /// Store `value` under `key`, combining with any existing value
    pub fn put<T>(&self, key: &NodeKey<T>, value: T) -> Result<Self>
    where
        T: ContextValue,
    {
        let incoming = StoredValue::encode(&value)?.with_equality::<T>();
        let mut next = self.clone();
        next.absorb(key.id(), incoming)?;
        Ok(next)
    }

    /// Read the value under `key`
    ///
    /// Returns `None` when the key is absent or the stored value does not
    /// decode as `T`.
    pub fn get<T>(&self, key: &NodeKey<T>) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let stored = self.entries.get(key.id())?;
        match stored.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(
                    "Context value '{}' was written as {} and cannot be read as {}: {}",
                    key.id(),
                    stored.type_name,
                    key.value_type(),
                    e
                );
                None
            }
        }
    }

    /// Read the value under `key`, failing if it is absent or mistyped
    pub fn require<T>(&self, key: &NodeKey<T>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.entries
            .get(key.id())
            .ok_or_else(|| PipelineError::MissingValue(key.id().to_string()))?
            .decode()
    }

    pub fn contains<T>(&self, key: &NodeKey<T>) -> bool {
        self.entries.contains_key(key.id())
    }

    /// Raw stored entry by id
    pub fn entry(&self, id: &str) -> Option<&StoredValue> {
        self.entries.get(id)
    }

    /// A context without `key`
    pub fn remove<T>(&self, key: &NodeKey<T>) -> Self {
        self.without(key.id())
    }

    fn without(&self, id: &str) -> Self {
        let mut next = self.clone();
        if next.entries.contains_key(id) {
            Arc::make_mut(&mut next.entries).shift_remove(id);
        }
        if let Some(contributions) = next.contributions.as_mut() {
            if contributions.contains_key(id) {
                Arc::make_mut(contributions).shift_remove(id);
            }
        }
        next
    }

    /// Fold every entry of `other` into this context, in `other`'s order
    ///
    /// An empty side returns the other side unchanged. A fork child always
    /// folds so that merged entries count as its own contributions.
    pub fn merge(&self, other: &SequenceContext) -> Result<Self> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() && !self.is_child() {
            return Ok(other.clone());
        }
        let mut next = self.clone();
        for (id, incoming) in other.entries.iter() {
            next.absorb(id, incoming.clone())?;
        }
        Ok(next)
    }

    /// Derive a context for a fork branch
    ///
    /// The child sees every entry of this context under a derived
    /// execution id and tracks its own writes separately, see
    /// [`contributions`](Self::contributions).
    pub fn create_child_context(&self, segment: impl fmt::Display) -> Self {
        Self {
            execution_id: self.execution_id.child(segment),
            entries: Arc::clone(&self.entries),
            contributions: Some(Arc::new(IndexMap::new())),
            combiners: Arc::clone(&self.combiners),
        }
    }

    /// The entries this context wrote since it was created as a child
    ///
    /// For a context that is not a fork child this is the whole context.
    /// Merging contributions rather than whole children keeps inherited
    /// values from being combined into the parent a second time.
    pub fn contributions(&self) -> Self {
        match &self.contributions {
            Some(contributions) => Self {
                execution_id: self.execution_id.clone(),
                entries: Arc::clone(contributions),
                contributions: None,
                combiners: Arc::clone(&self.combiners),
            },
            None => self.clone(),
        }
    }

    /// Whether this context was derived with [`create_child_context`](Self::create_child_context)
    pub fn is_child(&self) -> bool {
        self.contributions.is_some()
    }

    /// Id of the most recently inserted key
    pub fn last_key(&self) -> Option<&str> {
        self.entries.keys().next_back().map(String::as_str)
    }

    /// Key ids in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializable copy of this context
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            execution_id: self.execution_id.clone(),
            entries: self
                .entries
                .iter()
                .map(|(key, stored)| SnapshotEntry {
                    key: key.clone(),
                    type_name: stored.type_name.clone(),
                    value: stored.value.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a context from a snapshot
    pub fn from_snapshot(snapshot: ContextSnapshot, combiners: Arc<TypeCombinerFactory>) -> Self {
        let entries = snapshot
            .entries
            .into_iter()
            .map(|entry| {
                (
                    entry.key,
                    StoredValue::new(entry.type_name, entry.value),
                )
            })
            .collect();
        Self {
            execution_id: snapshot.execution_id,
            entries: Arc::new(entries),
            contributions: None,
            combiners,
        }
    }

    fn absorb(&mut self, id: &str, incoming: StoredValue) -> Result<()> {
        let stored = match self.entries.get(id) {
            Some(existing) => self.combiners.combine(id, existing, &incoming)?,
            None => incoming.clone(),
        };
        if let Some(contributions) = self.contributions.as_mut() {
            let contributed = match contributions.get(id) {
                Some(existing) => self.combiners.combine(id, existing, &incoming)?,
                None => incoming,
            };
            Arc::make_mut(contributions).insert(id.to_string(), contributed);
        }
        Arc::make_mut(&mut self.entries).insert(id.to_string(), stored);
        Ok(())
    }
}

impl Default for SequenceContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for SequenceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceContext")
            .field("execution_id", &self.execution_id)
            .field("entries", &self.entries)
            .field("is_child", &self.is_child())
            .finish()
    }
}

/// Persistable form of a [`SequenceContext`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub execution_id: ExecutionId,
    /// Entries in insertion order
    pub entries: Vec<SnapshotEntry>,
}

/// One persisted context entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub key: String,
    pub type_name: String,
    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> Arc<TypeCombinerFactory> {
        Arc::new(TypeCombinerFactory::new())
    }

    #[test]
    fn test_put_then_get_returns_value() {
        let key: NodeKey<f64> = NodeKey::new("price");
        let ctx = SequenceContext::empty().put(&key, 19.99).unwrap();
        assert_eq!(ctx.get(&key), Some(19.99));
        assert_eq!(ctx.require(&key).unwrap(), 19.99);
    }

    #[test]
    fn test_put_never_mutates_receiver() {
        let key: NodeKey<i64> = NodeKey::new("n");
        let base = SequenceContext::empty();
        let next = base.put(&key, 1).unwrap();
        assert!(base.is_empty());
        assert_eq!(next.len(), 1);
        assert_eq!(next.execution_id(), base.execution_id());
    }

    #[test]
    fn test_equal_values_collide_without_conflict() {
        let key: NodeKey<String> = NodeKey::new("status");
        let ctx = SequenceContext::new(ExecutionId::new_root(), strict())
            .put(&key, "ok".to_string())
            .unwrap()
            .put(&key, "ok".to_string())
            .unwrap();
        assert_eq!(ctx.get(&key).as_deref(), Some("ok"));

        let err = ctx.put(&key, "failed".to_string()).unwrap_err();
        assert!(matches!(err, PipelineError::CombinerConflict { .. }));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        tags: std::collections::HashSet<String>,
        scores: std::collections::HashMap<String, u32>,
    }

    /// Built from scratch each call, so each has its own hasher state
    fn profile(reverse: bool) -> Profile {
        let mut names: Vec<String> = (0..32).map(|i| format!("tag-{i}")).collect();
        if reverse {
            names.reverse();
        }
        Profile {
            scores: names.iter().map(|n| (n.clone(), n.len() as u32)).collect(),
            tags: names.into_iter().collect(),
        }
    }

    #[test]
    fn test_equal_hashed_collections_collide_without_conflict() {
        let key: NodeKey<Profile> = NodeKey::new("profile");
        let (a, b) = (profile(false), profile(true));
        assert_eq!(a, b);

        for combiners in [strict(), Arc::new(TypeCombinerFactory::default())] {
            let ctx = SequenceContext::new(ExecutionId::new_root(), combiners)
                .put(&key, a.clone())
                .unwrap()
                .put(&key, b.clone())
                .unwrap();
            assert_eq!(ctx.get(&key), Some(a.clone()));
        }

        // Separately written contexts merge the same way
        let left = SequenceContext::new(ExecutionId::new_root(), strict())
            .put(&key, a.clone())
            .unwrap();
        let right = SequenceContext::new(ExecutionId::new_root(), strict())
            .put(&key, b)
            .unwrap();
        assert_eq!(left.merge(&right).unwrap().get(&key), Some(a.clone()));

        let mut changed = a;
        changed.tags.insert("extra".to_string());
        let err = left.put(&key, changed).unwrap_err();
        assert!(matches!(err, PipelineError::CombinerConflict { .. }));
    }

    #[test]
    fn test_missing_and_mistyped_values() {
        let count: NodeKey<i64> = NodeKey::new("count");
        let ctx = SequenceContext::empty();
        assert!(matches!(
            ctx.require(&count).unwrap_err(),
            PipelineError::MissingValue(ref id) if id == "count"
        ));

        let as_text: NodeKey<String> = NodeKey::new("count");
        let ctx = ctx.put(&count, 3).unwrap();
        assert_eq!(ctx.get(&as_text), None);
        assert!(ctx.require(&as_text).is_err());
    }

    #[test]
    fn test_insertion_order_and_last_key() {
        let a: NodeKey<i64> = NodeKey::new("a");
        let b: NodeKey<i64> = NodeKey::new("b");
        let c: NodeKey<i64> = NodeKey::new("c");
        let ctx = SequenceContext::empty()
            .put(&b, 1)
            .unwrap()
            .put(&a, 2)
            .unwrap()
            .put(&c, 3)
            .unwrap();
        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(ctx.last_key(), Some("c"));

        let ctx = ctx.remove(&c);
        assert_eq!(ctx.last_key(), Some("a"));
    }

    #[test]
    fn test_merge_fast_paths_return_other_side() {
        let key: NodeKey<i64> = NodeKey::new("n");
        let full = SequenceContext::empty().put(&key, 1).unwrap();
        let empty = SequenceContext::empty();

        let merged = empty.merge(&full).unwrap();
        assert_eq!(merged.execution_id(), full.execution_id());
        let merged = full.merge(&empty).unwrap();
        assert_eq!(merged.get(&key), Some(1));
    }

    #[test]
    fn test_merge_applies_combiner_in_argument_order() {
        let key: NodeKey<Vec<String>> = NodeKey::new("log");
        let left = SequenceContext::empty()
            .put(&key, vec!["left".to_string()])
            .unwrap();
        let right = SequenceContext::empty()
            .put(&key, vec!["right".to_string()])
            .unwrap();

        let merged = left.merge(&right).unwrap();
        assert_eq!(merged.get(&key).unwrap(), vec!["left", "right"]);
        let merged = right.merge(&left).unwrap();
        assert_eq!(merged.get(&key).unwrap(), vec!["right", "left"]);
    }

    #[test]
    fn test_child_context_tracks_only_its_own_writes() {
        let items: NodeKey<Vec<i64>> = NodeKey::new("items");
        let other: NodeKey<String> = NodeKey::new("other");
        let parent = SequenceContext::empty().put(&items, vec![1]).unwrap();

        let child = parent.create_child_context(0);
        assert!(child.is_child());
        assert_eq!(child.execution_id(), &parent.execution_id().child(0));
        assert_eq!(child.get(&items), Some(vec![1]));

        let child = child
            .put(&items, vec![2])
            .unwrap()
            .put(&other, "x".to_string())
            .unwrap();
        assert_eq!(child.get(&items), Some(vec![1, 2]));

        let delta = child.contributions();
        assert_eq!(delta.get(&items), Some(vec![2]));
        assert_eq!(delta.get(&other).as_deref(), Some("x"));

        let merged = parent.merge(&delta).unwrap();
        assert_eq!(merged.get(&items), Some(vec![1, 2]));
    }

    #[test]
    fn test_snapshot_round_trip_preserves_order_and_id() {
        let a: NodeKey<i64> = NodeKey::new("a");
        let b: NodeKey<Vec<String>> = NodeKey::new("b");
        let ctx = SequenceContext::empty()
            .put(&b, vec!["x".to_string()])
            .unwrap()
            .put(&a, 7)
            .unwrap();

        let json = serde_json::to_string(&ctx.snapshot()).unwrap();
        let snapshot: ContextSnapshot = serde_json::from_str(&json).unwrap();
        let restored = SequenceContext::from_snapshot(snapshot, Arc::clone(ctx.combiners()));

        assert_eq!(restored.execution_id(), ctx.execution_id());
        assert_eq!(restored.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(restored.get(&a), Some(7));
        // Combiners still apply after a restore
        let restored = restored.put(&b, vec!["y".to_string()]).unwrap();
        assert_eq!(restored.get(&b).unwrap(), vec!["x", "y"]);
    }
}
