use crate::config::InvalidCookiePolicy;
use crate::cookie::{CookieManager, IncomingSessionId, MintReason, SessionIdSource};
use crate::registry::CookieRegistry;
use crate::state::errors::ReloadError;
use crate::{SessionConfig, SessionState, SessionStore};
use biscotti::{RequestCookies, ResponseCookies};
use errors::{FinalizeError, LoadSessionError};
use secrecy::{ExposeSecret, SecretString};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing_log_error::log_error;

/// Orchestrates the session lifecycle for each request.
///
/// It works in two phases:
///
/// 1. [`load`](SessionMiddleware::load), before the request handler is invoked.
///    It resolves the session id, queues a cookie for new sessions and, for
///    existing sessions, loads the session state from the store.
/// 2. [`finalize`](SessionMiddleware::finalize), after the request handler
///    has returned. It settles the session cookie and syncs the
///    session state with the store in the background.
///
/// When several middlewares are chained, their `finalize` steps must run in
/// reverse order relative to their `load` steps.
#[derive(Debug, Clone)]
pub struct SessionMiddleware {
    manager: Arc<CookieManager>,
    store: SessionStore,
    invalid_cookie: InvalidCookiePolicy,
}

/// The session attached to the current request.
///
/// It dereferences to [`SessionState`]. It must be handed back to
/// [`SessionMiddleware::finalize`] at the end of the request.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    incoming: IncomingSessionId,
    queued_cookie: Option<SecretString>,
}

impl Session {
    /// `true` if the session was created for this request:
    /// the client didn't present a usable session cookie.
    pub fn is_new(&self) -> bool {
        self.incoming.is_new()
    }

    /// Where the session id came from.
    pub fn id_source(&self) -> &SessionIdSource {
        &self.incoming.source
    }
}

impl Deref for Session {
    type Target = SessionState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

/// A background save or touch of the session record, spawned by
/// [`SessionMiddleware::finalize`].
///
/// Dropping the handle doesn't cancel the operation.
#[derive(Debug)]
pub struct PendingSync(tokio::task::JoinHandle<()>);

impl PendingSync {
    /// Wait for the operation to complete.
    ///
    /// Failures are logged by the background task itself: there is nothing to return.
    pub async fn wait(self) {
        if let Err(e) = self.0.await {
            log_error!(e, "The session sync task didn't run to completion");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SyncAction {
    Save,
    Touch,
}

impl SessionMiddleware {
    /// Build a middleware using the given configuration and store.
    ///
    /// The cookie manager is fetched from (or registered into) `registry`.
    /// The store timeout from `config` is applied to `store`.
    pub fn new(config: &SessionConfig, store: SessionStore, registry: &CookieRegistry) -> Self {
        Self {
            manager: registry.manager(&config.cookie, &config.secret),
            store: store.with_timeout(config.store_timeout),
            invalid_cookie: config.invalid_cookie,
        }
    }

    /// The manager for the session cookie.
    pub fn cookie_manager(&self) -> &CookieManager {
        &self.manager
    }

    /// The store backing this middleware.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Determine the session for the current request.
    ///
    /// New sessions start empty, without touching the store. Their cookie is
    /// queued on `response` right away, so that session middlewares loaded
    /// later in the same request cycle (sharing the cookie name and secret)
    /// pick up the same id. [`finalize`](Self::finalize) withdraws it if it
    /// turns out not to be needed.
    ///
    /// Existing sessions are loaded from the store: if there is no record
    /// for their id (e.g. it expired), they start empty too, keeping the id
    /// presented by the client.
    ///
    /// `host` is the host the request was addressed to
    /// (see [`request_host`](crate::cookie::request_host)), used as the cookie
    /// domain when none is configured.
    pub async fn load(
        &self,
        request: &RequestCookies<'_>,
        response: &mut ResponseCookies<'static>,
        host: Option<&str>,
    ) -> Result<Session, LoadSessionError> {
        let incoming = self.manager.get_session_id(request, response);
        match &incoming.source {
            SessionIdSource::Minted(MintReason::InvalidCookie(e))
                if self.invalid_cookie == InvalidCookiePolicy::Reject =>
            {
                return Err(LoadSessionError::InvalidCookie(e.clone()));
            }
            SessionIdSource::Minted(MintReason::SecretMismatch) => {
                return Err(LoadSessionError::SecretMismatch);
            }
            _ => {}
        }

        let mut state = SessionState::new(incoming.id, self.store.clone());
        let queued_cookie = if incoming.is_new() {
            let value = self
                .manager
                .add_cookie(&incoming.id, host, response)
                .map_err(LoadSessionError::CookieEncoding)?;
            Some(SecretString::from(value))
        } else {
            state.reload().await.map_err(|e| match e {
                ReloadError::Store(e) => LoadSessionError::Store(e),
                ReloadError::Deserialization { source } => LoadSessionError::CorruptedState(source),
            })?;
            None
        };
        tracing::debug!(
            session.id = ?incoming.id,
            session.is_new = incoming.is_new(),
            "Loaded session"
        );
        Ok(Session {
            state,
            incoming,
            queued_cookie,
        })
    }

    /// Wrap up the session at the end of the request.
    ///
    /// - A non-empty session that didn't come from the client's cookie makes
    ///   sure its cookie is queued on the response.
    /// - A new session that ends up empty withdraws the cookie queued by
    ///   [`load`](Self::load), unless another middleware sharing the cookie
    ///   has claimed it in the meantime. Nothing is written to the store.
    /// - A destroyed session, which the client holds a cookie for,
    ///   gets a removal cookie.
    /// - Dirty state is saved, non-empty clean state is touched, empty clean
    ///   state is left alone. Both operations run in the background:
    ///   their failures are logged, never returned.
    ///
    /// `host` must match the one passed to [`load`](Self::load).
    pub fn finalize(
        &self,
        session: Session,
        response_cookies: &mut ResponseCookies<'static>,
        host: Option<&str>,
    ) -> Result<Option<PendingSync>, FinalizeError> {
        let Session {
            state,
            incoming,
            queued_cookie,
        } = session;

        if state.is_empty() && incoming.is_new() {
            if let Some(value) = queued_cookie {
                self.manager
                    .withdraw_cookie(value.expose_secret(), host, response_cookies);
            }
            // There is no record for a brand-new id: nothing to save, delete or touch.
            return Ok(None);
        }

        if state.is_destroyed() && state.is_empty() && !state.is_dirty() {
            self.manager.remove_cookie(host, response_cookies);
            return Ok(None);
        }

        if !state.is_empty() && !matches!(incoming.source, SessionIdSource::RequestCookie) {
            self.queue_cookie(&state, &incoming.source, host, response_cookies)?;
        }

        let action = if state.is_dirty() {
            SyncAction::Save
        } else if !state.is_empty() {
            SyncAction::Touch
        } else {
            return Ok(None);
        };
        let runtime = tokio::runtime::Handle::try_current().map_err(FinalizeError::NoRuntime)?;
        Ok(Some(PendingSync(runtime.spawn(sync(state, action)))))
    }

    /// Make sure the cookie for a session that didn't come from the client
    /// is on the response.
    ///
    /// A session that picked up its id from a cookie queued by another middleware
    /// re-queues it: the cookie gets a new value, which marks it as claimed.
    fn queue_cookie(
        &self,
        state: &SessionState,
        source: &SessionIdSource,
        host: Option<&str>,
        response_cookies: &mut ResponseCookies<'static>,
    ) -> Result<(), FinalizeError> {
        match self.manager.decode_response_cookie(response_cookies) {
            Some(Err(e)) => return Err(FinalizeError::CookieConflict(e)),
            Some(Ok(id)) if id != state.id() => {
                tracing::warn!(
                    session.id = ?state.id(),
                    cookie.session_id = ?id,
                    "A session cookie for another session was already queued on the response. \
                    The state of this session will be saved, but the client won't be able to access it"
                );
                return Ok(());
            }
            Some(Ok(_)) if matches!(source, SessionIdSource::Minted(_)) => return Ok(()),
            _ => {}
        }
        self.manager
            .add_cookie(&state.id(), host, response_cookies)
            .map_err(FinalizeError::CookieEncoding)?;
        Ok(())
    }
}

async fn sync(mut state: SessionState, action: SyncAction) {
    match action {
        SyncAction::Save => {
            if let Err(e) = state.save().await {
                log_error!(e, session.id = ?state.id(), "Failed to save the session state");
            }
        }
        SyncAction::Touch => {
            if let Err(e) = state.touch().await {
                log_error!(
                    e,
                    session.id = ?state.id(),
                    "Failed to refresh the expiry of the session record"
                );
            }
        }
    }
}

/// Errors that can occur when loading or finalizing a session.
pub mod errors {
    use crate::crypto::errors::{DecodeError, EncodeError};
    use crate::store::errors::LoadError;
    use http::StatusCode;

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`SessionMiddleware::load`](super::SessionMiddleware::load).
    pub enum LoadSessionError {
        /// The session cookie sent by the client can't be decoded
        /// and the middleware is configured to reject such requests.
        #[error("The session cookie is invalid")]
        InvalidCookie(#[source] DecodeError),
        /// A session cookie with the same name, encoded with a different secret,
        /// was already queued on the response.
        #[error(
            "A session cookie with the same name but a different secret was already set on the response"
        )]
        SecretMismatch,
        /// The session record exists but it can't be deserialized.
        #[error("The session record is corrupted")]
        CorruptedState(#[source] serde_json::Error),
        #[error("Failed to load the session record")]
        Store(#[source] LoadError),
        #[error("Failed to encode the session cookie")]
        CookieEncoding(#[source] EncodeError),
    }

    impl LoadSessionError {
        /// The status code of the response that should be sent back to the client.
        pub fn status_code(&self) -> StatusCode {
            match self {
                LoadSessionError::InvalidCookie(_) => StatusCode::BAD_REQUEST,
                LoadSessionError::SecretMismatch
                | LoadSessionError::CorruptedState(_)
                | LoadSessionError::Store(_)
                | LoadSessionError::CookieEncoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }

        /// Convert the error into a response, with an empty body.
        pub fn into_response<B: Default>(&self) -> http::Response<B> {
            empty_response(self.status_code())
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`SessionMiddleware::finalize`](super::SessionMiddleware::finalize).
    pub enum FinalizeError {
        #[error("Failed to encode the session cookie")]
        CookieEncoding(#[source] EncodeError),
        /// A session cookie with the same name was already queued on the response,
        /// but it was encoded using a different secret.
        #[error(
            "A session cookie with the same name but a different secret was already set on the response"
        )]
        CookieConflict(#[source] DecodeError),
        #[error("There is no Tokio runtime to sync the session state on")]
        NoRuntime(#[source] tokio::runtime::TryCurrentError),
    }

    impl FinalizeError {
        /// Convert the error into a response, with an empty body.
        pub fn into_response<B: Default>(&self) -> http::Response<B> {
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }

    pub(crate) fn empty_response<B: Default>(status: StatusCode) -> http::Response<B> {
        let mut response = http::Response::new(B::default());
        *response.status_mut() = status;
        response
    }
}
