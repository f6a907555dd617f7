use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure the cookie used to store the encrypted session id on the client-side.
pub struct SessionCookieConfig {
    /// The name of the cookie used to store the session id.
    ///
    /// By default, the name is set to `kitura-session-id`.
    #[serde(default = "default_session_cookie_name")]
    pub name: String,
    /// Set the `Path` attribute on the session cookie.
    ///
    /// By default, the attribute is set to `/`.
    #[serde(default = "default_session_cookie_path")]
    pub path: String,
    /// Set the `Domain` attribute on the session cookie.
    ///
    /// When left unset, the host the request was addressed to is used instead.
    /// If the host is unknown too, the attribute is omitted.
    #[serde(default)]
    pub domain: Option<String>,
    /// Set the `Secure` attribute on the session cookie.
    ///
    /// Default is `false`.
    #[serde(default)]
    pub secure: bool,
    /// Set the `HttpOnly` attribute on the session cookie.
    ///
    /// If the cookie is marked as `HttpOnly`, it will not be visible to JavaScript
    /// snippets running in the browser.
    ///
    /// Default is `true`.
    #[serde(default = "default_session_cookie_http_only")]
    pub http_only: bool,
    /// Set the `Max-Age` attribute on the session cookie.
    ///
    /// When unset (or zero), the cookie expires at the end of the browser session.
    #[serde(default, with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

impl Default for SessionCookieConfig {
    fn default() -> Self {
        Self {
            name: default_session_cookie_name(),
            path: default_session_cookie_path(),
            domain: None,
            secure: false,
            http_only: default_session_cookie_http_only(),
            max_age: None,
        }
    }
}

impl SessionCookieConfig {
    /// The `Max-Age` to set on the cookie, if any.
    ///
    /// A zero duration is treated as "no `Max-Age`".
    pub(crate) fn effective_max_age(&self) -> Option<Duration> {
        self.max_age.filter(|max_age| !max_age.is_zero())
    }
}

fn default_session_cookie_name() -> String {
    "kitura-session-id".to_string()
}

fn default_session_cookie_path() -> String {
    "/".to_string()
}

fn default_session_cookie_http_only() -> bool {
    true
}
