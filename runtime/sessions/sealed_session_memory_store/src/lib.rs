//! An in-memory session store for `sealed_session`, geared towards testing and local development.
use bytes::Bytes;
use sealed_session::{
    SessionId,
    store::{
        SessionStorageBackend,
        errors::{DeleteError, LoadError, SaveError, TouchError},
    },
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio::time::Instant;

pub use kit::InMemorySessionKit;

#[derive(Clone)]
/// An in-memory session store.
///
/// # Limitations
///
/// This store won't persist data between server restarts.
/// It also won't synchronize data between multiple server instances.
/// It is primarily intended for testing and local development.
///
/// By default, records never expire. Use [`InMemorySessionStore::with_ttl`]
/// to set an expiry, refreshed every time a record is saved or touched.
pub struct InMemorySessionStore {
    records: Arc<Mutex<HashMap<SessionId, StoreRecord>>>,
    ttl: Option<Duration>,
}

impl std::fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct StoreRecord {
    payload: Bytes,
    deadline: Option<Instant>,
}

impl StoreRecord {
    fn is_stale(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    /// Creates a new (empty) in-memory session store, whose records never expire.
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            ttl: None,
        }
    }

    /// Expire records `ttl` after they were last saved or touched.
    ///
    /// Expired records are treated as missing. They are only removed
    /// from memory by [`InMemorySessionStore::delete_expired`].
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn deadline(&self) -> Option<Instant> {
        self.ttl.map(|ttl| Instant::now() + ttl)
    }

    /// Delete all expired records from the store.
    ///
    /// It returns the number of records that were deleted.
    #[tracing::instrument(name = "Delete expired records", level = tracing::Level::TRACE, skip_all)]
    pub async fn delete_expired(&self) -> usize {
        let mut guard = self.records.lock().await;
        let now = Instant::now();
        let before = guard.len();
        guard.retain(|_, record| !record.is_stale(now));
        before - guard.len()
    }

    /// The number of records held in memory, including expired records
    /// that haven't been deleted yet.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// `true` if the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl SessionStorageBackend for InMemorySessionStore {
    #[tracing::instrument(name = "Load server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn load(&self, id: &SessionId) -> Result<Option<Bytes>, LoadError> {
        let guard = self.records.lock().await;
        let outcome = guard
            .get(id)
            .filter(|record| !record.is_stale(Instant::now()))
            .map(|record| record.payload.clone());
        Ok(outcome)
    }

    #[tracing::instrument(name = "Save server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn save(&self, id: &SessionId, payload: Bytes) -> Result<(), SaveError> {
        let deadline = self.deadline();
        let mut guard = self.records.lock().await;
        guard.insert(*id, StoreRecord { payload, deadline });
        Ok(())
    }

    #[tracing::instrument(name = "Touch server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn touch(&self, id: &SessionId) -> Result<(), TouchError> {
        let deadline = self.deadline();
        let mut guard = self.records.lock().await;
        if let Some(record) = guard.get_mut(id) {
            if !record.is_stale(Instant::now()) {
                record.deadline = deadline;
            }
        }
        Ok(())
    }

    #[tracing::instrument(name = "Delete server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        let mut guard = self.records.lock().await;
        guard.remove(id);
        Ok(())
    }
}

mod kit {
    use crate::InMemorySessionStore;
    use sealed_session::{CookieRegistry, SessionConfig, SessionMiddleware, SessionStore};

    #[derive(Clone, Debug)]
    #[non_exhaustive]
    /// A [`SessionMiddleware`] backed by an in-memory store,
    /// the default choice when no other storage backend is configured.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sealed_session::{CookieRegistry, SessionConfig};
    /// use sealed_session_memory_store::InMemorySessionKit;
    ///
    /// let registry = CookieRegistry::new();
    /// let middleware = InMemorySessionKit::new(SessionConfig::new("a long, random secret"))
    ///     .build(&registry);
    /// ```
    pub struct InMemorySessionKit {
        /// The session configuration.
        pub config: SessionConfig,
        /// The store sessions are kept in.
        ///
        /// By default, a fresh [`InMemorySessionStore`] without expiry.
        pub store: InMemorySessionStore,
    }

    impl InMemorySessionKit {
        pub fn new(config: SessionConfig) -> Self {
            Self {
                config,
                store: InMemorySessionStore::new(),
            }
        }

        /// Build the session middleware.
        ///
        /// A warning is logged: the in-memory store is not meant for production.
        pub fn build(self, registry: &CookieRegistry) -> SessionMiddleware {
            tracing::warn!(
                "Sessions are kept in memory: they are lost on restart, they are not shared \
                across server instances and they never expire unless a TTL is configured. \
                Don't use the in-memory session store in production"
            );
            SessionMiddleware::new(&self.config, SessionStore::new(self.store), registry)
        }
    }
}
