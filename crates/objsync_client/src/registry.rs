//! Class name to Rust type registration.
//!
//! Event payloads arrive as JSON tagged with a class name. A subscription
//! resolves its decoder from the registry once, when it is created, so a
//! missing or conflicting registration fails before anything is sent.

use crate::error::{ClientError, ClientResult};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

type ErasedDecode = Arc<dyn Fn(Value) -> ClientResult<Box<dyn Any + Send>> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    type_id: TypeId,
    type_name: &'static str,
    decode: ErasedDecode,
}

/// Maps class names to decode functions.
#[derive(Default)]
pub struct TypeRegistry {
    entries: RwLock<HashMap<String, Registration>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` for `class_name`, decoding with serde.
    pub fn register<T>(&self, class_name: impl Into<String>)
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.register_with::<T, _>(class_name, |value| {
            serde_json::from_value(value).map_err(|e| ClientError::Protocol(e.into()))
        });
    }

    /// Registers `T` for `class_name` with a custom decode function.
    ///
    /// A later registration for the same class replaces the earlier one.
    pub fn register_with<T, F>(&self, class_name: impl Into<String>, decode: F)
    where
        T: Send + 'static,
        F: Fn(Value) -> ClientResult<T> + Send + Sync + 'static,
    {
        let decode: ErasedDecode =
            Arc::new(move |value| decode(value).map(|t| Box::new(t) as Box<dyn Any + Send>));
        self.entries.write().insert(
            class_name.into(),
            Registration {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                decode,
            },
        );
    }

    /// Returns true if `class_name` is registered.
    pub fn contains(&self, class_name: &str) -> bool {
        self.entries.read().contains_key(class_name)
    }

    /// Returns the registered class names, sorted.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolves the decoder for `class_name` as `T`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::UnregisteredType`] if nothing is registered
    /// - [`ClientError::TypeMismatch`] if the class is registered as another type
    pub fn decoder<T: 'static>(&self, class_name: &str) -> ClientResult<Decoder<T>> {
        let entries = self.entries.read();
        let registration = entries
            .get(class_name)
            .ok_or_else(|| ClientError::UnregisteredType(class_name.to_string()))?;

        if registration.type_id != TypeId::of::<T>() {
            return Err(ClientError::TypeMismatch {
                class_name: class_name.to_string(),
                registered: registration.type_name,
                requested: type_name::<T>(),
            });
        }

        Ok(Decoder {
            class_name: class_name.to_string(),
            decode: registration.decode.clone(),
            _marker: PhantomData,
        })
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("classes", &self.class_names())
            .finish()
    }
}

/// Typed decoder resolved from a [`TypeRegistry`].
pub struct Decoder<T> {
    class_name: String,
    decode: ErasedDecode,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Decoder<T> {
    /// Returns the class this decoder was resolved for.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Decodes one event payload.
    pub fn decode(&self, value: Value) -> ClientResult<T> {
        let decoded = (self.decode)(value)?;
        decoded
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| ClientError::TypeMismatch {
                class_name: self.class_name.clone(),
                registered: "<other>",
                requested: type_name::<T>(),
            })
    }
}

impl<T> Clone for Decoder<T> {
    fn clone(&self) -> Self {
        Self {
            class_name: self.class_name.clone(),
            decode: self.decode.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Decoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("class_name", &self.class_name)
            .finish_non_exhaustive()
    }
}
