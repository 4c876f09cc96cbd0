//! Typed context keys

use std::any::type_name;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use uuid::Uuid;

/// Reserved id under which a contextual sequence stores its starting input
pub const INITIAL_KEY_ID: &str = "initial";

/// Identity of a context entry plus the type stored under it.
///
/// Two keys are equal when their ids match, whatever `T` they declare.
/// Reusing one id with two different types is a caller error that shows
/// up as a deserialization failure on read.
pub struct NodeKey<T> {
    id: Arc<str>,
    _type: PhantomData<fn() -> T>,
}

impl<T> NodeKey<T> {
    /// Create a key with a fixed id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Arc::from(id.into()),
            _type: PhantomData,
        }
    }

    /// Create a key with a fresh random id
    pub fn random() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// The reserved key that holds a contextual sequence's starting input
    pub fn initial() -> Self {
        Self::new(INITIAL_KEY_ID)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rust type name of the declared value type
    pub fn value_type(&self) -> &'static str {
        type_name::<T>()
    }
}

impl<T> Clone for NodeKey<T> {
    fn clone(&self) -> Self {
        Self {
            id: Arc::clone(&self.id),
            _type: PhantomData,
        }
    }
}

impl<T> PartialEq for NodeKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for NodeKey<T> {}

impl<T> Hash for NodeKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for NodeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKey")
            .field("id", &self.id)
            .field("type", &type_name::<T>())
            .finish()
    }
}

impl<T> fmt::Display for NodeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Identity of a registered sequence: its input type, output type and id
///
/// Equality is by id only.
pub struct SequenceKey<I, O> {
    id: Arc<str>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> SequenceKey<I, O> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Arc::from(id.into()),
            _types: PhantomData,
        }
    }

    pub fn new_random() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input_type(&self) -> &'static str {
        type_name::<I>()
    }

    pub fn output_type(&self) -> &'static str {
        type_name::<O>()
    }
}

impl<I, O> Clone for SequenceKey<I, O> {
    fn clone(&self) -> Self {
        Self {
            id: Arc::clone(&self.id),
            _types: PhantomData,
        }
    }
}

impl<I, O> PartialEq for SequenceKey<I, O> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<I, O> Eq for SequenceKey<I, O> {}

impl<I, O> Hash for SequenceKey<I, O> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<I, O> fmt::Debug for SequenceKey<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceKey")
            .field("id", &self.id)
            .field("input", &type_name::<I>())
            .field("output", &type_name::<O>())
            .finish()
    }
}

impl<I, O> fmt::Display for SequenceKey<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_is_by_id_only() {
        let a: NodeKey<i64> = NodeKey::new("total");
        let b: NodeKey<i64> = NodeKey::new("total");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert_ne!(a, NodeKey::new("subtotal"));
    }

    #[test]
    fn test_random_keys_are_distinct() {
        let a: NodeKey<String> = NodeKey::random();
        let b: NodeKey<String> = NodeKey::random();
        assert_ne!(a, b);
    }

    #[test]
    fn test_initial_key_and_type() {
        let key: NodeKey<Vec<String>> = NodeKey::initial();
        assert_eq!(key.id(), INITIAL_KEY_ID);
        assert!(key.value_type().contains("Vec"));
    }

    #[test]
    fn test_sequence_key_identity() {
        let a: SequenceKey<String, i64> = SequenceKey::new("orders");
        assert_eq!(a, SequenceKey::new("orders"));
        assert_ne!(a, SequenceKey::new_random());
        assert!(a.input_type().contains("String"));
        assert_eq!(a.output_type(), "i64");
    }
}
