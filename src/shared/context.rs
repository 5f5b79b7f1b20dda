//! Call-chain context
//!
//! An immutable, scoped key/value carrier threaded explicitly through a
//! logical call chain. Deriving a context with [`Context::with_value`] never
//! mutates the parent: the child sees every ancestor value, siblings never
//! see each other's values. Values are shared by `Arc`, so interior state of
//! a stored value (e.g. a transaction frame's depth) is visible to every
//! holder.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed key for a context value.
///
/// Two keys with the same name address the same slot; a lookup with a key
/// whose type does not match the stored value reads as absent.
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

struct Node {
    key: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Node>>,
}

/// Scoped key/value carrier. Cheap to clone.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Node>>,
}

impl Context {
    /// Empty root context.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child context that associates `value` with `key`.
    pub fn with_value<T>(&self, key: ContextKey<T>, value: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            head: Some(Arc::new(Node {
                key: key.name,
                value,
                parent: self.head.clone(),
            })),
        }
    }

    /// Nearest value stored under `key`, if it has type `T`.
    pub fn value<T>(&self, key: ContextKey<T>) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let mut node = self.head.as_ref();
        while let Some(current) = node {
            if current.key == key.name {
                return current.value.clone().downcast::<T>().ok();
            }
            node = current.parent.as_ref();
        }
        None
    }

    pub fn contains<T>(&self, key: ContextKey<T>) -> bool
    where
        T: Any + Send + Sync,
    {
        self.value(key).is_some()
    }

    /// Names of the visible keys, nearest first. Shadowed entries are skipped.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = Vec::new();
        let mut node = self.head.as_ref();
        while let Some(current) = node {
            if !keys.contains(&current.key) {
                keys.push(current.key);
            }
            node = current.parent.as_ref();
        }
        keys
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("keys", &self.keys()).finish()
    }
}
