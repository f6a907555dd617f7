use biscotti::{Processor, ProcessorConfig, RequestCookies, ResponseCookies};
use http::header::{COOKIE, SET_COOKIE};
use sealed_session::{
    Session, SessionMiddleware,
    cookie::{extract_request_cookies, inject_response_cookies, request_host},
    errors::{FinalizeError, LoadSessionError},
};

pub fn processor() -> Processor {
    ProcessorConfig::default().into()
}

/// Parse the content of a `Cookie` header.
pub fn request_cookies(header: &str) -> RequestCookies<'_> {
    let mut cookies = RequestCookies::new();
    cookies.extend_from_header(header, &processor()).unwrap();
    cookies
}

/// A parsed `Set-Cookie` header value.
#[derive(Debug, Clone)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub attributes: Vec<String>,
    pub raw: String,
}

impl SetCookie {
    pub fn parse(header: &str) -> Self {
        let mut parts = header.split(';').map(str::trim);
        let (name, value) = parts.next().unwrap().split_once('=').unwrap();
        Self {
            name: name.to_owned(),
            value: value.to_owned(),
            attributes: parts.map(ToOwned::to_owned).collect(),
            raw: header.to_owned(),
        }
    }

    /// The value of the attribute named `name`, if it's set.
    ///
    /// The lookup is case-insensitive.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find_map(|attribute| {
            let (key, value) = attribute.split_once('=')?;
            key.eq_ignore_ascii_case(name).then_some(value)
        })
    }

    /// `true` if the flag named `name` (e.g. `Secure`) is set.
    pub fn has_flag(&self, name: &str) -> bool {
        self.attributes
            .iter()
            .any(|attribute| attribute.eq_ignore_ascii_case(name))
    }

    /// The `Cookie` header a client would send back after receiving this cookie.
    pub fn as_cookie_header(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Render the queued cookies as `Set-Cookie` headers.
pub fn set_cookies(response_cookies: ResponseCookies<'static>) -> Vec<SetCookie> {
    response_cookies
        .header_values(&processor())
        .map(|header| SetCookie::parse(&header))
        .collect()
}

/// Load the session for a request carrying the given `Cookie` header, if any.
///
/// The cookie queued for a new session is thrown away: [`finalize`] starts
/// from an empty set of response cookies.
pub async fn load(
    middleware: &SessionMiddleware,
    cookie_header: Option<&str>,
) -> Result<Session, LoadSessionError> {
    let request_cookies = match cookie_header {
        Some(header) => request_cookies(header),
        None => RequestCookies::new(),
    };
    middleware
        .load(&request_cookies, &mut ResponseCookies::new(), None)
        .await
}

/// Finalize the session, wait for the store to be synced and return
/// the `Set-Cookie` headers that would be sent to the client.
pub async fn finalize(
    middleware: &SessionMiddleware,
    session: Session,
    host: Option<&str>,
) -> Result<Vec<SetCookie>, FinalizeError> {
    let mut response_cookies = ResponseCookies::new();
    if let Some(pending_sync) = middleware.finalize(session, &mut response_cookies, host)? {
        pending_sync.wait().await;
    }
    Ok(set_cookies(response_cookies))
}

/// Drive a request through the session middleware, the way a server would:
/// load the session, invoke `handler`, finalize the session, wait for the
/// store to be synced and attach the `Set-Cookie` headers to the response.
pub async fn serve<F>(
    middleware: &SessionMiddleware,
    request: http::Request<String>,
    handler: F,
) -> http::Response<String>
where
    F: FnOnce(&mut Session, String) -> String,
{
    let processor = processor();
    let (parts, body) = request.into_parts();
    let host = request_host(&parts);
    let request_cookies = extract_request_cookies(&parts.headers, &processor);
    let mut response_cookies = ResponseCookies::new();

    let session = middleware
        .load(&request_cookies, &mut response_cookies, host.as_deref())
        .await;
    let mut session = match session {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };
    let body = handler(&mut session, body);
    match middleware.finalize(session, &mut response_cookies, host.as_deref()) {
        Ok(Some(pending_sync)) => pending_sync.wait().await,
        Ok(None) => {}
        Err(e) => return e.into_response(),
    }
    inject_response_cookies(http::Response::new(body), response_cookies, &processor).unwrap()
}

/// Extract the session cookie from a response, if there is one.
pub fn session_cookie(response: &http::Response<String>, name: &str) -> Option<SetCookie> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .into_iter()
        .map(|value| SetCookie::parse(value.to_str().unwrap()))
        .find(|cookie| cookie.name == name)
}

/// A minimal user agent: it remembers the session cookie it receives
/// and sends it back on subsequent requests.
#[derive(Debug, Default)]
pub struct Browser {
    cookie: Option<String>,
}

impl Browser {
    pub fn request(&self, method: http::Method, path: &str, body: &str) -> http::Request<String> {
        let mut builder = http::Request::builder()
            .method(method)
            .uri(path)
            .header("Host", "example.com");
        if let Some(cookie) = &self.cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(body.to_owned()).unwrap()
    }

    pub fn remember(&mut self, response: &http::Response<String>, cookie_name: &str) {
        if let Some(cookie) = session_cookie(response, cookie_name) {
            self.cookie = Some(cookie.as_cookie_header());
        }
    }

    pub fn cookie_header(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub fn tamper_with_cookie(&mut self, new_value: &str) {
        let cookie = self.cookie.take().unwrap();
        let (name, _) = cookie.split_once('=').unwrap();
        self.cookie = Some(format!("{name}={new_value}"));
    }
}

/// Give background tasks (e.g. the touch spawned when extracting a typed
/// session) a chance to run to completion.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
