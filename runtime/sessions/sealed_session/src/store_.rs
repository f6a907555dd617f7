use crate::SessionId;
use bytes::Bytes;
use errors::{DeleteError, LoadError, SaveError, TouchError};
use std::{future::Future, sync::Arc, time::Duration};

/// Where server-side session records are stored.
///
/// It is a thin wrapper
/// [around your chosen storage backend implementation][`SessionStorageBackend`],
/// removing the need to specify the concrete type of the storage backend
/// everywhere in your code.
///
/// Cloning a `SessionStore` is cheap: all clones share the same backend.
///
/// # Timeouts
///
/// Every operation can be bounded by a timeout (see [`SessionStore::with_timeout`]).
/// When the timeout elapses, the operation is abandoned and the `Timeout` variant
/// of the corresponding error is returned.
///
/// # Concurrency
///
/// No locking is performed across requests that share a session id.
/// If two requests save the same session concurrently, the last write wins.
#[derive(Debug, Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionStorageBackend>,
    timeout: Option<Duration>,
}

impl SessionStore {
    /// Creates a new session store using the provided backend.
    ///
    /// No timeout is applied to store operations.
    pub fn new<Backend>(backend: Backend) -> Self
    where
        Backend: SessionStorageBackend + 'static,
    {
        Self {
            backend: Arc::new(backend),
            timeout: None,
        }
    }

    /// Bound every store operation by the given timeout.
    ///
    /// `None` disables the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The timeout applied to store operations, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Loads the payload associated with the provided session id.
    ///
    /// `Ok(None)` means that there is no record for this id:
    /// it never existed, it expired or it was deleted.
    pub async fn load(&self, id: &SessionId) -> Result<Option<Bytes>, LoadError> {
        self.bounded(self.backend.load(id), |after| LoadError::Timeout { after })
            .await
    }

    /// Stores the payload for the provided session id,
    /// overwriting the existing record, if any.
    pub async fn save(&self, id: &SessionId, payload: Bytes) -> Result<(), SaveError> {
        self.bounded(self.backend.save(id, payload), |after| SaveError::Timeout {
            after,
        })
        .await
    }

    /// Refresh the expiry of the record for the provided session id,
    /// leaving its payload unchanged.
    pub async fn touch(&self, id: &SessionId) -> Result<(), TouchError> {
        self.bounded(self.backend.touch(id), |after| TouchError::Timeout { after })
            .await
    }

    /// Deletes the record for the provided session id.
    pub async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        self.bounded(self.backend.delete(id), |after| DeleteError::Timeout {
            after,
        })
        .await
    }

    async fn bounded<T, E, F>(&self, operation: F, on_timeout: fn(Duration) -> E) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let Some(timeout) = self.timeout else {
            return operation.await;
        };
        match tokio::time::timeout(timeout, operation).await {
            Ok(outcome) => outcome,
            Err(_) => Err(on_timeout(timeout)),
        }
    }
}

#[async_trait::async_trait]
/// The interface of a session storage backend.
///
/// Backends deal in opaque payloads: serializing the session state
/// is taken care of by [`SessionState`](crate::SessionState).
///
/// Implementations must be safe to call concurrently for different ids.
pub trait SessionStorageBackend: std::fmt::Debug + Send + Sync {
    /// Loads the payload associated with the provided session id.
    ///
    /// If there is no record for this id, or the record has expired,
    /// `Ok(None)` must be returned.
    async fn load(&self, id: &SessionId) -> Result<Option<Bytes>, LoadError>;

    /// Stores the payload for the provided session id.
    ///
    /// It overwrites the existing record, if any.
    async fn save(&self, id: &SessionId, payload: Bytes) -> Result<(), SaveError>;

    /// Refresh the expiry of the record for the provided session id.
    ///
    /// Backends without expiry support can implement this as a no-op.
    async fn touch(&self, id: &SessionId) -> Result<(), TouchError>;

    /// Deletes the record for the provided session id.
    ///
    /// Deleting a record that doesn't exist is not an error.
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError>;
}

/// Errors that can occur when interacting with a session storage backend.
pub mod errors {
    use std::time::Duration;

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::load`][super::SessionStorageBackend::load].
    pub enum LoadError {
        /// The backend didn't answer in time.
        #[error("The session store didn't load the session record within {after:?}.")]
        Timeout { after: Duration },
        /// Something else went wrong when loading the session record.
        #[error("Something went wrong when loading the session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::save`][super::SessionStorageBackend::save].
    pub enum SaveError {
        /// The backend didn't answer in time.
        #[error("The session store didn't save the session record within {after:?}.")]
        Timeout { after: Duration },
        /// Something else went wrong when saving the session record.
        #[error("Something went wrong when saving the session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::touch`][super::SessionStorageBackend::touch].
    pub enum TouchError {
        /// The backend didn't answer in time.
        #[error("The session store didn't refresh the session record within {after:?}.")]
        Timeout { after: Duration },
        /// Something else went wrong when refreshing the expiry of the session record.
        #[error("Something went wrong when refreshing the expiry of the session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::delete`][super::SessionStorageBackend::delete].
    pub enum DeleteError {
        /// The backend didn't answer in time.
        #[error("The session store didn't delete the session record within {after:?}.")]
        Timeout { after: Duration },
        /// Something else went wrong when deleting the session record.
        #[error("Something went wrong when deleting the session record.")]
        Other(#[source] anyhow::Error),
    }
}
