use std::fmt;

#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
/// The identifier for a session.
///
/// # Format stability
///
/// From an API perspective, a session id is an opaque string.
/// Its textual representation is always 36 characters long (a hyphenated UUID),
/// since the cookie cipher relies on that length to strip its padding.
///
/// # Secrecy
///
/// Whoever knows a session id can impersonate the session owner.
/// The [`Debug`] representation is therefore redacted: only the last four
/// characters are shown, which is enough to correlate log lines.
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// The length of the textual representation of a session id.
    pub const ENCODED_LEN: usize = 36;

    /// Generate a new random identifier using the random number generator
    /// provided by the underlying operating system.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a session id out of its textual representation.
    pub fn parse(s: &str) -> Result<Self, InvalidSessionId> {
        if s.len() != Self::ENCODED_LEN {
            return Err(InvalidSessionId);
        }
        uuid::Uuid::try_parse(s)
            .map(Self)
            .map_err(|_| InvalidSessionId)
    }

    /// Access the underlying UUID.
    pub fn inner(&self) -> uuid::Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buffer = uuid::Uuid::encode_buffer();
        let encoded = self.0.as_hyphenated().encode_lower(&mut buffer);
        write!(f, "SessionId(…{})", &encoded[encoded.len() - 4..])
    }
}

#[derive(Debug, thiserror::Error)]
#[error("The value is not a valid session id")]
/// The error returned by [`SessionId::parse`].
pub struct InvalidSessionId;
