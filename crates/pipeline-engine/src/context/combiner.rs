//! Collision resolution for context writes
//!
//! When a context already holds a value under a key and another value
//! arrives, a combiner folds `(existing, incoming)` into the stored value.
//! [`TypeCombinerFactory`] picks the combiner in this order:
//!
//! 1. a combiner registered for the key id
//! 2. a combiner registered for the exact Rust type name of the value
//! 3. a combiner registered for the value's [`ValueKind`] (sequence, set
//!    or map), then one registered for [`ValueKind::Any`]
//! 4. the strict default: equal values are kept, unequal values conflict

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::NodeKey;
use crate::error::{PipelineError, Result};

/// Combiner over stored representations
pub type CombineFn =
    Arc<dyn Fn(&Value, &Value) -> std::result::Result<Value, String> + Send + Sync>;

/// Equality of two stored representations, judged on the decoded values
pub type EqualityFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Container family of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// `Vec`, `VecDeque`, `LinkedList`
    Sequence,
    /// `HashSet`, `BTreeSet`, `IndexSet`
    Set,
    /// `HashMap`, `BTreeMap`, `IndexMap`
    Map,
    /// Matches every value; consulted after the specific kinds
    Any,
}

impl ValueKind {
    /// Classify a stored value by the type that wrote it
    ///
    /// Returns `None` for scalars, structs and anything else that is not a
    /// standard container, so those only ever match [`ValueKind::Any`].
    pub fn classify(type_name: &str, value: &Value) -> Option<ValueKind> {
        let base = type_name.split('<').next().unwrap_or(type_name);
        let base = base.rsplit("::").next().unwrap_or(base);
        match (base, value) {
            ("Vec" | "VecDeque" | "LinkedList", Value::Array(_)) => Some(ValueKind::Sequence),
            ("HashSet" | "BTreeSet" | "IndexSet", Value::Array(_)) => Some(ValueKind::Set),
            ("HashMap" | "BTreeMap" | "IndexMap", Value::Object(_)) => Some(ValueKind::Map),
            _ => None,
        }
    }
}

/// A stored value together with the type that wrote it
///
/// Values written through a typed key also carry an equality check on the
/// decoded type. JSON alone cannot tell that two hash sets or hash maps
/// are equal, since their serialized order depends on the hasher. The
/// check is not persisted, so values rebuilt from a snapshot compare by
/// their JSON until a typed write lands on the same key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredValue {
    pub type_name: String,
    pub value: Value,
    #[serde(skip)]
    equality: Option<EqualityFn>,
}

impl StoredValue {
    /// An untyped stored value
    pub fn new(type_name: impl Into<String>, value: Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
            equality: None,
        }
    }

    /// Serialize a typed value
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new(type_name::<T>(), serde_json::to_value(value)?))
    }

    /// Judge equality with `T`'s `PartialEq` rather than by JSON
    pub fn with_equality<T>(mut self) -> Self
    where
        T: DeserializeOwned + PartialEq + 'static,
    {
        self.equality = Some(Arc::new(|a: &Value, b: &Value| {
            match (
                serde_json::from_value::<T>(a.clone()),
                serde_json::from_value::<T>(b.clone()),
            ) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
        }));
        self
    }

    /// Deserialize into the requested type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }

    /// Whether `other` holds the same value
    ///
    /// Identical JSON is always equal. Otherwise both sides must come from
    /// the same type and a typed equality check, from either side, decides.
    pub fn same_value(&self, other: &StoredValue) -> bool {
        if self.value == other.value {
            return true;
        }
        if self.type_name != other.type_name {
            return false;
        }
        match other.equality.as_ref().or(self.equality.as_ref()) {
            Some(equal) => equal(&self.value, &other.value),
            None => false,
        }
    }

    pub fn kind(&self) -> Option<ValueKind> {
        ValueKind::classify(&self.type_name, &self.value)
    }
}

/// Registry of combiners consulted on key collision
#[derive(Clone)]
pub struct TypeCombinerFactory {
    by_key: HashMap<String, CombineFn>,
    by_type: HashMap<String, CombineFn>,
    by_kind: HashMap<ValueKind, CombineFn>,
}

impl TypeCombinerFactory {
    /// A factory with no registrations: every collision of unequal values fails
    pub fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            by_type: HashMap::new(),
            by_kind: HashMap::new(),
        }
    }

    /// Register a typed combiner for one key
    pub fn register_key<T, F>(&mut self, key: &NodeKey<T>, combine: F) -> &mut Self
    where
        T: Serialize + DeserializeOwned + 'static,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.by_key
            .insert(key.id().to_string(), typed_combiner(combine));
        self
    }

    /// Register a typed combiner for every value of type `T`
    pub fn register_type<T, F>(&mut self, combine: F) -> &mut Self
    where
        T: Serialize + DeserializeOwned + 'static,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.by_type
            .insert(type_name::<T>().to_string(), typed_combiner(combine));
        self
    }

    /// Register a combiner over stored values for a whole container family
    pub fn register_kind<F>(&mut self, kind: ValueKind, combine: F) -> &mut Self
    where
        F: Fn(&Value, &Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.by_kind.insert(kind, Arc::new(combine));
        self
    }

    /// Builder form of [`register_key`](Self::register_key)
    pub fn with_key<T, F>(mut self, key: &NodeKey<T>, combine: F) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.register_key(key, combine);
        self
    }

    /// Builder form of [`register_type`](Self::register_type)
    pub fn with_type<T, F>(mut self, combine: F) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.register_type::<T, F>(combine);
        self
    }

    /// Builder form of [`register_kind`](Self::register_kind)
    pub fn with_kind<F>(mut self, kind: ValueKind, combine: F) -> Self
    where
        F: Fn(&Value, &Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.register_kind(kind, combine);
        self
    }

    /// Find the combiner for a collision, if any is registered
    ///
    /// `None` means the strict default applies.
    pub fn resolve(&self, key: &str, incoming: &StoredValue) -> Option<&CombineFn> {
        self.by_key
            .get(key)
            .or_else(|| self.by_type.get(&incoming.type_name))
            .or_else(|| incoming.kind().and_then(|kind| self.by_kind.get(&kind)))
            .or_else(|| self.by_kind.get(&ValueKind::Any))
    }

    /// Fold `incoming` into `existing` under `key`
    pub fn combine(
        &self,
        key: &str,
        existing: &StoredValue,
        incoming: &StoredValue,
    ) -> Result<StoredValue> {
        match self.resolve(key, incoming) {
            Some(combine) => {
                let value = combine(&existing.value, &incoming.value).map_err(|message| {
                    PipelineError::CombinerFailed {
                        key: key.to_string(),
                        message,
                    }
                })?;
                Ok(StoredValue {
                    type_name: incoming.type_name.clone(),
                    value,
                    equality: incoming.equality.clone(),
                })
            }
            None if existing.same_value(incoming) => Ok(existing.clone()),
            None => Err(PipelineError::CombinerConflict {
                key: key.to_string(),
                type_name: incoming.type_name.clone(),
            }),
        }
    }
}

impl Default for TypeCombinerFactory {
    /// Sequences concatenate, sets union, maps union with the incoming side winning
    fn default() -> Self {
        Self::new()
            .with_kind(ValueKind::Sequence, concat_arrays)
            .with_kind(ValueKind::Set, union_arrays)
            .with_kind(ValueKind::Map, union_objects)
    }
}

impl PartialEq for StoredValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.value == other.value
    }
}

impl fmt::Debug for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredValue")
            .field("type_name", &self.type_name)
            .field("value", &self.value)
            .finish()
    }
}

impl fmt::Debug for TypeCombinerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.by_kind.keys().collect();
        kinds.sort_by_key(|kind| format!("{kind:?}"));
        f.debug_struct("TypeCombinerFactory")
            .field("keys", &self.by_key.keys().collect::<Vec<_>>())
            .field("types", &self.by_type.keys().collect::<Vec<_>>())
            .field("kinds", &kinds)
            .finish()
    }
}

fn typed_combiner<T, F>(combine: F) -> CombineFn
where
    T: Serialize + DeserializeOwned + 'static,
    F: Fn(T, T) -> T + Send + Sync + 'static,
{
    Arc::new(move |existing: &Value, incoming: &Value| {
        let existing: T = serde_json::from_value(existing.clone()).map_err(|e| e.to_string())?;
        let incoming: T = serde_json::from_value(incoming.clone()).map_err(|e| e.to_string())?;
        serde_json::to_value(combine(existing, incoming)).map_err(|e| e.to_string())
    })
}

fn as_array<'a>(value: &'a Value, side: &str) -> std::result::Result<&'a Vec<Value>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("{side} value is not a sequence"))
}

/// Concatenate two sequences, existing elements first
pub fn concat_arrays(existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
    let mut out = as_array(existing, "existing")?.clone();
    out.extend(as_array(incoming, "incoming")?.iter().cloned());
    Ok(Value::Array(out))
}

/// Union two sets, keeping the existing order and appending new elements
pub fn union_arrays(existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
    let mut out = as_array(existing, "existing")?.clone();
    for item in as_array(incoming, "incoming")? {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    Ok(Value::Array(out))
}

/// Union two maps; on a shared key the incoming entry wins
pub fn union_objects(existing: &Value, incoming: &Value) -> std::result::Result<Value, String> {
    let mut out = existing
        .as_object()
        .ok_or("existing value is not a map")?
        .clone();
    let incoming = incoming.as_object().ok_or("incoming value is not a map")?;
    for (k, v) in incoming {
        out.insert(k.clone(), v.clone());
    }
    Ok(Value::Object(out))
}
