use crate::config::InvalidCookiePolicy;
use crate::cookie::{CookieManager, MintReason, SessionIdSource};
use crate::registry::CookieRegistry;
use crate::state::errors::SaveStateError;
use crate::store::errors::{DeleteError, TouchError};
use crate::{SessionConfig, SessionId, SessionStore};
use biscotti::{RequestCookies, ResponseCookies};
use bytes::Bytes;
use errors::ExtractError;
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing_log_error::log_error;

/// A session whose data is an application-defined type,
/// rather than a free-form set of key-value pairs.
///
/// The whole value is serialized to (and deserialized from) the store
/// as a single JSON document.
///
/// # Example
///
/// ```rust
/// use sealed_session::{SessionId, TypedSession};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct ShoppingCart {
///     id: SessionId,
///     items: Vec<String>,
/// }
///
/// impl TypedSession for ShoppingCart {
///     fn new(id: SessionId) -> Self {
///         Self { id, items: vec![] }
///     }
///
///     fn session_id(&self) -> &SessionId {
///         &self.id
///     }
/// }
/// ```
pub trait TypedSession: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Build a brand-new session with the given id.
    fn new(id: SessionId) -> Self;

    /// The id of the session.
    fn session_id(&self) -> &SessionId;
}

/// Extracts, saves and destroys sessions of type `S`.
///
/// Unlike [`SessionMiddleware`](crate::SessionMiddleware), the session cookie
/// is queued as soon as a new session is created, regardless of its content.
pub struct TypedSessionKit<S> {
    manager: Arc<CookieManager>,
    store: SessionStore,
    invalid_cookie: InvalidCookiePolicy,
    _session: PhantomData<fn() -> S>,
}

impl<S> std::fmt::Debug for TypedSessionKit<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedSessionKit")
            .field("session", &std::any::type_name::<S>())
            .field("manager", &self.manager)
            .field("store", &self.store)
            .finish()
    }
}

impl<S> Clone for TypedSessionKit<S> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            store: self.store.clone(),
            invalid_cookie: self.invalid_cookie,
            _session: PhantomData,
        }
    }
}

impl<S: TypedSession> TypedSessionKit<S> {
    pub fn new(config: &SessionConfig, store: SessionStore, registry: &CookieRegistry) -> Self {
        Self {
            manager: registry.manager(&config.cookie, &config.secret),
            store: store.with_timeout(config.store_timeout),
            invalid_cookie: config.invalid_cookie,
            _session: PhantomData,
        }
    }

    /// The manager for the session cookie.
    pub fn cookie_manager(&self) -> &CookieManager {
        &self.manager
    }

    /// Determine the session for the current request.
    ///
    /// - New sessions get a session cookie queued on the response right away.
    /// - Existing sessions are loaded from the store. If a record is found,
    ///   its expiry is refreshed in the background. If there is no record,
    ///   a brand-new session is built around the id presented by the client.
    pub async fn extract(
        &self,
        request: &RequestCookies<'_>,
        response: &mut ResponseCookies<'static>,
        host: Option<&str>,
    ) -> Result<S, ExtractError> {
        let incoming = self.manager.get_session_id(request, response);
        match &incoming.source {
            SessionIdSource::Minted(MintReason::InvalidCookie(e))
                if self.invalid_cookie == InvalidCookiePolicy::Reject =>
            {
                return Err(ExtractError::InvalidCookie(e.clone()));
            }
            SessionIdSource::Minted(MintReason::SecretMismatch) => {
                return Err(ExtractError::SecretMismatch);
            }
            _ => {}
        }

        let id = incoming.id;
        if incoming.is_new() {
            self.manager
                .add_cookie(&id, host, response)
                .map_err(ExtractError::CookieEncoding)?;
            return Ok(S::new(id));
        }

        let Some(payload) = self.store.load(&id).await.map_err(ExtractError::Store)? else {
            tracing::debug!(session.id = ?id, "No session record found, starting afresh");
            return Ok(S::new(id));
        };
        let session = serde_json::from_slice(&payload).map_err(ExtractError::CorruptedState)?;
        self.touch_in_background(id);
        Ok(session)
    }

    /// Serialize the session and write it to the store.
    pub async fn save(&self, session: &S) -> Result<(), SaveStateError> {
        let payload = serde_json::to_vec(session)
            .map_err(|e| SaveStateError::Serialization { source: e })?;
        self.store
            .save(session.session_id(), Bytes::from(payload))
            .await?;
        Ok(())
    }

    /// Delete the session record from the store.
    pub async fn destroy(&self, session: &S) -> Result<(), DeleteError> {
        self.store.delete(session.session_id()).await
    }

    /// Refresh the expiry of the session record.
    pub async fn touch(&self, session: &S) -> Result<(), TouchError> {
        self.store.touch(session.session_id()).await
    }

    fn touch_in_background(&self, id: SessionId) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                session.id = ?id,
                "There is no Tokio runtime to refresh the session record on, skipping"
            );
            return;
        };
        let store = self.store.clone();
        runtime.spawn(async move {
            if let Err(e) = store.touch(&id).await {
                log_error!(
                    e,
                    session.id = ?id,
                    "Failed to refresh the expiry of the session record"
                );
            }
        });
    }
}

/// Errors that can occur when extracting a typed session.
pub mod errors {
    use crate::crypto::errors::{DecodeError, EncodeError};
    use crate::middleware::errors::empty_response;
    use crate::store::errors::LoadError;
    use http::StatusCode;

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`TypedSessionKit::extract`](super::TypedSessionKit::extract).
    pub enum ExtractError {
        /// The session cookie sent by the client can't be decoded
        /// and the kit is configured to reject such requests.
        #[error("The session cookie is invalid")]
        InvalidCookie(#[source] DecodeError),
        /// A session cookie with the same name, encoded with a different secret,
        /// was already queued on the response.
        #[error(
            "A session cookie with the same name but a different secret was already set on the response"
        )]
        SecretMismatch,
        #[error("Failed to encode the session cookie")]
        CookieEncoding(#[source] EncodeError),
        /// The session record exists but it can't be deserialized into the session type.
        #[error("The session record is corrupted")]
        CorruptedState(#[source] serde_json::Error),
        #[error("Failed to load the session record")]
        Store(#[source] LoadError),
    }

    impl ExtractError {
        /// The status code of the response that should be sent back to the client.
        pub fn status_code(&self) -> StatusCode {
            match self {
                ExtractError::InvalidCookie(_) => StatusCode::BAD_REQUEST,
                ExtractError::SecretMismatch
                | ExtractError::CookieEncoding(_)
                | ExtractError::CorruptedState(_)
                | ExtractError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }

        /// Convert the error into a response, with an empty body.
        pub fn into_response<B: Default>(&self) -> http::Response<B> {
            empty_response(self.status_code())
        }
    }
}
