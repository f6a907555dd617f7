/*!
Server-side sessions, identified by an encrypted and signed session cookie.

# Anatomy of a session

The client holds a single cookie, carrying the **session id**.
The id is never sent in the clear: it's encrypted with AES-128-CBC and
authenticated with HMAC-SHA256, using two keys derived from a secret that
only the server knows (see [`crypto`]). A client can't read its own session id,
nor forge a valid one.

The session state is kept on the server, in a **session storage backend**
(see [`SessionStorageBackend`](store::SessionStorageBackend)), keyed by the session id.

# Request lifecycle

[`SessionMiddleware`] drives the lifecycle of a session:

1. [`SessionMiddleware::load`] resolves the session id (from the request cookie,
   from a cookie queued on the response by another middleware, or by minting a
   new one). A freshly minted id gets its cookie queued on the response straight
   away. Existing sessions have their state loaded from the store.
2. The request handler reads and mutates the [`Session`].
3. [`SessionMiddleware::finalize`] withdraws the cookie of new sessions that
   ended up empty, and then saves the state (if it changed) or refreshes its expiry
   (if it didn't, but it's not empty). New sessions that ended up empty never hit the store.

If your session data is better described by a single type rather than
a bag of key-value pairs, use [`TypedSessionKit`] instead.

# Invalid cookies

A session cookie that can't be decoded (it was tampered with, truncated, or encoded
using a different secret) is handled according to
[`InvalidCookiePolicy`](config::InvalidCookiePolicy): by default, it's logged
and a new session is started. Alternatively, the request can be rejected
with a `400 Bad Request`.

# Multiple session configurations

Several middlewares (or typed session kits) can share the same cookie name,
as long as they use the same secret and are built against the same
[`CookieRegistry`]: they'll resolve to the same session id within a request,
whether they're chained one after the other or nested. Their `finalize` steps
must run in reverse order relative to their `load` steps.
Sharing a cookie name across different secrets is a configuration error:
it's logged when the registry detects it and it causes requests handled by
both configurations to fail with a `500 Internal Server Error`.

# Limitations

There is no locking across requests that share the same session id.
If two concurrent requests modify the same session, the last one to
save its state wins: the changes of the other one are lost.
*/
pub mod config;
pub mod cookie;
pub mod crypto;
mod id;
mod middleware;
mod registry;
mod state;
mod store_;
mod typed;

pub use id::{InvalidSessionId, SessionId};
pub use middleware::{PendingSync, Session, SessionMiddleware};
pub use registry::CookieRegistry;
pub use state::SessionState;
pub use store_::SessionStore;
pub use typed::{TypedSession, TypedSessionKit};

pub mod store {
    //! Types and traits related to [`SessionStore`][super::SessionStore].
    pub use crate::store_::SessionStorageBackend;
    pub use crate::store_::errors;
}

pub mod errors {
    //! The errors returned by session operations.
    pub use crate::middleware::errors::{FinalizeError, LoadSessionError};
    pub use crate::state::errors::{
        AppendError, ReadError, ReloadError, SaveStateError, ValueDeserializationError,
        ValueSerializationError,
    };
    pub use crate::typed::errors::ExtractError;
}

use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how sessions are managed.
///
/// Use [`SessionConfig::load`] to read it from a YAML file and/or
/// the environment, or [`SessionConfig::new`] to build it in code.
pub struct SessionConfig {
    /// The secret the cookie encryption and signature keys are derived from.
    ///
    /// Every process that needs to decode session cookies issued by the others
    /// must use the same secret. Changing it invalidates all outstanding sessions.
    pub secret: SecretString,
    #[serde(default)]
    /// Configure the session cookie.
    pub cookie: config::SessionCookieConfig,
    /// The maximum amount of time a single store operation may take.
    ///
    /// Defaults to 5 seconds. `None` disables the timeout.
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub store_timeout: Option<Duration>,
    #[serde(default)]
    /// What to do with session cookies that can't be decoded.
    pub invalid_cookie: config::InvalidCookiePolicy,
}

impl SessionConfig {
    /// Build a configuration using the given secret and the default
    /// value for every other field.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
            cookie: Default::default(),
            store_timeout: default_store_timeout(),
            invalid_cookie: Default::default(),
        }
    }
}

fn default_store_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}
