use crate::{SessionId, SessionStore};
use bytes::Bytes;
use errors::{
    AppendError, ReadError, ReloadError, SaveStateError, ValueDeserializationError,
    ValueSerializationError,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::{HashMap, hash_map::Entry};

use crate::store::errors::{DeleteError, TouchError};

/// The server-side state attached to a session.
///
/// It's a set of key-value pairs, where the values are JSON documents.
/// Typed access goes through `serde`: see [`SessionState::insert`],
/// [`SessionState::get`] and [`SessionState::read`].
///
/// # Dirty tracking
///
/// Every write (`set_raw`, `insert`, `remove`, `clear`, the append family)
/// marks the state as dirty, even if the written value is equal to the old one.
/// The flag is cleared by a successful [`reload`](SessionState::reload),
/// by a successful [`save`](SessionState::save) and by
/// [`destroy`](SessionState::destroy).
#[derive(Debug)]
pub struct SessionState {
    id: SessionId,
    store: SessionStore,
    state: HashMap<String, Value>,
    dirty: bool,
    destroyed: bool,
}

impl SessionState {
    /// Create an empty, clean state for the given session id.
    ///
    /// Nothing is read from the store: use [`SessionState::reload`] for that.
    pub fn new(id: SessionId, store: SessionStore) -> Self {
        Self {
            id,
            store,
            state: HashMap::new(),
            dirty: false,
            destroyed: false,
        }
    }

    /// The id of the session this state belongs to.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The store this state is loaded from and saved to.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// `true` if the state was modified since it was last loaded or saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// `true` if there are no entries in the state.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// `true` if [`SessionState::destroy`] was called on this state.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// The number of entries in the state.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// Iterate over the keys currently set.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.state.keys().map(String::as_str)
    }

    /// Get the raw JSON value associated with `key`, if any.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Set the raw JSON value associated with `key`.
    ///
    /// It returns the value previously associated with `key`, if any.
    pub fn set_raw(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.dirty = true;
        self.state.insert(key.into(), value)
    }

    /// Remove the value associated with `key`.
    ///
    /// The state is marked as dirty even if `key` wasn't set.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.dirty = true;
        self.state.remove(key)
    }

    /// Remove all entries from the state.
    ///
    /// The session record is kept in the store: use [`SessionState::destroy`]
    /// to get rid of it.
    pub fn clear(&mut self) {
        self.dirty = true;
        self.state.clear();
    }

    /// Serialize `value` and associate it with `key`.
    ///
    /// It returns the raw value previously associated with `key`, if any.
    /// If serialization fails, the state is left untouched.
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Option<Value>, ValueSerializationError> {
        let key = key.into();
        let value = to_value(&key, value)?;
        Ok(self.set_raw(key, value))
    }

    /// Deserialize the value associated with `key`, if any.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ValueDeserializationError> {
        self.state
            .get(key)
            .map(|value| from_value(key, value))
            .transpose()
    }

    /// Deserialize the value associated with `key`.
    ///
    /// Unlike [`SessionState::get`], a missing key is an error:
    /// [`ReadError::KeyNotFound`].
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<T, ReadError> {
        match self.state.get(key) {
            Some(value) => Ok(from_value(key, value)?),
            None => Err(ReadError::KeyNotFound {
                key: key.to_owned(),
            }),
        }
    }

    /// Push `item` at the end of the array associated with `key`.
    ///
    /// A missing key is treated as an empty array.
    pub fn append<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        item: &T,
    ) -> Result<(), AppendError> {
        let key = key.into();
        let item = to_value(&key, item)?;
        self.update_array(key, |array| array.push(item))
    }

    /// Append `items`, in order, at the end of the array associated with `key`.
    ///
    /// A missing key is treated as an empty array. No de-duplication is performed.
    pub fn extend<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        items: &[T],
    ) -> Result<(), AppendError> {
        let key = key.into();
        let items = items
            .iter()
            .map(|item| to_value(&key, item))
            .collect::<Result<Vec<_>, _>>()?;
        self.update_array(key, |array| array.extend(items))
    }

    /// Merge `entries` into the object associated with `key`.
    ///
    /// A missing key is treated as an empty object.
    /// On conflict, the new value replaces the old one.
    pub fn merge<K, V, I>(&mut self, key: impl Into<String>, entries: I) -> Result<(), AppendError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Serialize,
    {
        let key = key.into();
        let entries = entries
            .into_iter()
            .map(|(k, v)| to_value(&key, &v).map(|v| (k.into(), v)))
            .collect::<Result<Vec<(String, Value)>, _>>()?;
        match self.state.entry(key) {
            Entry::Occupied(mut occupied) => {
                let Value::Object(object) = occupied.get_mut() else {
                    return Err(AppendError::ShapeMismatch {
                        key: occupied.key().clone(),
                        expected: "object",
                        found: shape(occupied.get()),
                    });
                };
                object.extend(entries);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Value::Object(entries.into_iter().collect()));
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn update_array(
        &mut self,
        key: String,
        f: impl FnOnce(&mut Vec<Value>),
    ) -> Result<(), AppendError> {
        match self.state.entry(key) {
            Entry::Occupied(mut occupied) => {
                let Value::Array(array) = occupied.get_mut() else {
                    return Err(AppendError::ShapeMismatch {
                        key: occupied.key().clone(),
                        expected: "array",
                        found: shape(occupied.get()),
                    });
                };
                f(array);
            }
            Entry::Vacant(vacant) => {
                let mut array = Vec::new();
                f(&mut array);
                vacant.insert(Value::Array(array));
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Replace the in-memory state with the record held by the store.
    ///
    /// If the store has no record for this id, the state is reset to empty.
    /// On failure, the in-memory state is left as it was.
    pub async fn reload(&mut self) -> Result<(), ReloadError> {
        let state = match self.store.load(&self.id).await? {
            Some(payload) => serde_json::from_slice(&payload)
                .map_err(|e| ReloadError::Deserialization { source: e })?,
            None => HashMap::new(),
        };
        self.state = state;
        self.dirty = false;
        Ok(())
    }

    /// Serialize the state and write it to the store,
    /// overwriting the existing record.
    ///
    /// The dirty flag is cleared on success.
    pub async fn save(&mut self) -> Result<(), SaveStateError> {
        let payload = serde_json::to_vec(&self.state)
            .map_err(|e| SaveStateError::Serialization { source: e })?;
        self.store.save(&self.id, Bytes::from(payload)).await?;
        self.dirty = false;
        tracing::trace!(session.id = ?self.id, "Saved the session state");
        Ok(())
    }

    /// Refresh the expiry of the session record, without changing it.
    pub async fn touch(&self) -> Result<(), TouchError> {
        self.store.touch(&self.id).await
    }

    /// Delete the session record from the store and empty the in-memory state.
    ///
    /// The in-memory state is emptied and marked as clean even if the
    /// deletion fails: the failure is reported, not retried.
    pub async fn destroy(&mut self) -> Result<(), DeleteError> {
        let outcome = self.store.delete(&self.id).await;
        self.state.clear();
        self.dirty = false;
        self.destroyed = true;
        outcome
    }
}

fn to_value<T: Serialize>(key: &str, value: &T) -> Result<Value, ValueSerializationError> {
    serde_json::to_value(value).map_err(|e| ValueSerializationError {
        key: key.to_owned(),
        source: e,
    })
}

fn from_value<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T, ValueDeserializationError> {
    T::deserialize(value).map_err(|e| ValueDeserializationError {
        key: key.to_owned(),
        source: e,
    })
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Errors that can occur when manipulating the session state.
pub mod errors {
    use crate::store::errors::{LoadError, SaveError};

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`SessionState::reload`][super::SessionState::reload].
    pub enum ReloadError {
        #[error("Failed to load the session record")]
        Store(#[from] LoadError),
        #[error("The session record can't be deserialized")]
        Deserialization {
            #[source]
            source: serde_json::Error,
        },
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`SessionState::save`][super::SessionState::save].
    pub enum SaveStateError {
        #[error("Failed to serialize the session state")]
        Serialization {
            #[source]
            source: serde_json::Error,
        },
        #[error("Failed to save the session record")]
        Store(#[from] SaveError),
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`SessionState::read`][super::SessionState::read].
    pub enum ReadError {
        /// There is no value associated with the key.
        #[error("There is no value associated with `{key}`")]
        KeyNotFound { key: String },
        #[error(transparent)]
        Deserialization(#[from] ValueDeserializationError),
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by the append family of methods on
    /// [`SessionState`][super::SessionState].
    pub enum AppendError {
        #[error(transparent)]
        Serialization(#[from] ValueSerializationError),
        /// The existing value doesn't have the shape required by the operation.
        #[error("Expected the value associated with `{key}` to be an {expected}, found: {found}")]
        ShapeMismatch {
            key: String,
            expected: &'static str,
            found: &'static str,
        },
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to deserialize the value associated with `{key}`")]
    /// One of the errors returned by [`SessionState::get`][super::SessionState::get].
    pub struct ValueDeserializationError {
        /// The key of the value that we failed to deserialize.
        pub key: String,
        #[source]
        /// The underlying deserialization error.
        pub source: serde_json::Error,
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to serialize the value associated with `{key}`")]
    /// One of the errors returned by [`SessionState::insert`][super::SessionState::insert].
    pub struct ValueSerializationError {
        /// The key of the value that we failed to serialize.
        pub key: String,
        #[source]
        /// The underlying serialization error.
        pub source: serde_json::Error,
    }
}
