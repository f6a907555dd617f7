#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// What to do when the incoming request carries a session cookie
/// that can't be decoded (malformed, tampered with, or signed with another secret).
pub enum InvalidCookiePolicy {
    /// Ignore the cookie and start a brand-new session.
    ///
    /// The invalid cookie is logged at `WARN` level.
    /// This is the default.
    #[default]
    StartNewSession,
    /// Reject the request with a `400 Bad Request`, without invoking
    /// the request handler.
    ///
    /// Pick this policy if you'd rather surface tampering attempts and
    /// secret misconfigurations than hand out fresh anonymous sessions.
    Reject,
}
