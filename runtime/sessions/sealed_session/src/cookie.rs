use crate::SessionId;
use crate::config::SessionCookieConfig;
use crate::crypto::CookieCrypto;
use crate::crypto::errors::{DecodeError, EncodeError};
use biscotti::{
    Processor, RemovalCookie, RequestCookies, ResponseCookie, ResponseCookieId, ResponseCookies,
};
use errors::{InjectResponseCookiesError, InvalidCookieHeader};
use http::header::{COOKIE, HOST, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use tracing_log_error::log_error;

/// Owns the attributes of the session cookie and the cipher that
/// protects its value.
///
/// It knows how to find the session id in the incoming request
/// (or in the cookies already queued on the response) and how to
/// hand it back to the client.
#[derive(Debug)]
pub struct CookieManager {
    config: SessionCookieConfig,
    crypto: CookieCrypto,
}

/// The session id resolved for the current request,
/// together with where it came from.
#[derive(Debug, Clone)]
pub struct IncomingSessionId {
    pub id: SessionId,
    pub source: SessionIdSource,
}

impl IncomingSessionId {
    /// `true` if the id was minted for this request.
    pub fn is_new(&self) -> bool {
        matches!(self.source, SessionIdSource::Minted(_))
    }
}

#[derive(Debug, Clone)]
/// Where the session id for the current request came from.
pub enum SessionIdSource {
    /// The session cookie sent by the client.
    RequestCookie,
    /// A session cookie queued on the response earlier in the same
    /// request cycle, e.g. by another session middleware sharing the cookie name.
    ResponseCookie,
    /// There was no usable session cookie: a brand-new id was generated.
    Minted(MintReason),
}

#[derive(Debug, Clone)]
/// Why a brand-new session id had to be generated.
pub enum MintReason {
    /// Neither the request nor the response carried a session cookie.
    NoCookie,
    /// The client sent a session cookie that couldn't be decoded.
    InvalidCookie(DecodeError),
    /// A session cookie with the same name was queued on the response,
    /// but we can't decode it. It was most likely encoded using a different secret.
    SecretMismatch,
}

impl CookieManager {
    pub fn new(config: SessionCookieConfig, crypto: CookieCrypto) -> Self {
        Self { config, crypto }
    }

    /// The configuration of the session cookie.
    pub fn config(&self) -> &SessionCookieConfig {
        &self.config
    }

    /// The name of the session cookie.
    pub fn cookie_name(&self) -> &str {
        &self.config.name
    }

    /// Determine the session id for the current request.
    ///
    /// The request cookie is looked at first, followed by a session cookie
    /// that may have been queued on the response earlier in the same request cycle.
    /// If neither yields an id, a new random one is generated.
    pub fn get_session_id(
        &self,
        request: &RequestCookies<'_>,
        response: &ResponseCookies<'_>,
    ) -> IncomingSessionId {
        let mut invalid_request_cookie = None;
        if let Some(cookie) = request.get(&self.config.name) {
            match self.crypto.decode_id(cookie.value()) {
                Ok(id) => {
                    return IncomingSessionId {
                        id,
                        source: SessionIdSource::RequestCookie,
                    };
                }
                Err(e) => {
                    log_error!(
                        e,
                        level: tracing::Level::WARN,
                        cookie.name = %self.config.name,
                        "The session cookie attached to the request is invalid"
                    );
                    invalid_request_cookie = Some(e);
                }
            }
        }

        if let Some(outcome) = self.decode_response_cookie(response) {
            return match outcome {
                Ok(id) => IncomingSessionId {
                    id,
                    source: SessionIdSource::ResponseCookie,
                },
                Err(e) => {
                    log_error!(
                        e,
                        cookie.name = %self.config.name,
                        "Failed to decode the session cookie already set on the response. \
                        Possible mismatch of cookie secret between session middlewares sharing the same cookie name"
                    );
                    IncomingSessionId {
                        id: SessionId::random(),
                        source: SessionIdSource::Minted(MintReason::SecretMismatch),
                    }
                }
            };
        }

        let reason = match invalid_request_cookie {
            Some(e) => MintReason::InvalidCookie(e),
            None => MintReason::NoCookie,
        };
        IncomingSessionId {
            id: SessionId::random(),
            source: SessionIdSource::Minted(reason),
        }
    }

    /// Decode the session cookie queued on the response, if there is one.
    ///
    /// Removal cookies are ignored.
    pub fn decode_response_cookie(
        &self,
        response: &ResponseCookies<'_>,
    ) -> Option<Result<SessionId, DecodeError>> {
        response
            .iter()
            .find(|cookie| cookie.name() == self.config.name && !cookie.value().is_empty())
            .map(|cookie| self.crypto.decode_id(cookie.value()))
    }

    /// `true` if a session cookie has already been queued on the response.
    pub fn cookie_exists(&self, response: &ResponseCookies<'_>) -> bool {
        self.decode_response_cookie(response).is_some()
    }

    /// Queue a session cookie carrying `id` on the response.
    /// It returns the encoded value of the cookie.
    ///
    /// The `Domain` attribute is set to the configured domain or, if there is none,
    /// to `host` (the host the request was addressed to).
    pub fn add_cookie(
        &self,
        id: &SessionId,
        host: Option<&str>,
        response: &mut ResponseCookies<'static>,
    ) -> Result<String, EncodeError> {
        let value = self.crypto.encode_id(id)?;
        let config = &self.config;
        let mut cookie = ResponseCookie::new(config.name.clone(), value.clone())
            .set_path(config.path.clone());
        if let Some(domain) = config.domain.as_deref().or(host) {
            cookie = cookie.set_domain(domain.to_owned());
        }
        if config.secure {
            cookie = cookie.set_secure(true);
        }
        if config.http_only {
            cookie = cookie.set_http_only(true);
        }
        if let Some(max_age) = config.effective_max_age() {
            let max_age = jiff::SignedDuration::try_from(max_age)
                .unwrap_or(jiff::SignedDuration::MAX);
            cookie = cookie.set_max_age(max_age);
        }
        response.insert(cookie);
        Ok(value)
    }

    /// Discard the session cookie queued on the response, as long as its
    /// value is still `value`.
    /// It returns `true` if the cookie was discarded.
    ///
    /// Unlike [`remove_cookie`](Self::remove_cookie), the client isn't
    /// instructed to do anything: the cookie is simply not sent.
    pub fn withdraw_cookie(
        &self,
        value: &str,
        host: Option<&str>,
        response: &mut ResponseCookies<'static>,
    ) -> bool {
        let config = &self.config;
        let unchanged = response
            .iter()
            .any(|cookie| cookie.name() == config.name && cookie.value() == value);
        if unchanged {
            let mut id = ResponseCookieId::new(config.name.as_str()).set_path(config.path.as_str());
            if let Some(domain) = config.domain.as_deref().or(host) {
                id = id.set_domain(domain);
            }
            response.discard(id);
        }
        unchanged
    }

    /// Queue a removal cookie on the response, instructing the client
    /// to forget its session cookie.
    pub fn remove_cookie(&self, host: Option<&str>, response: &mut ResponseCookies<'static>) {
        let config = &self.config;
        let mut cookie = RemovalCookie::new(config.name.clone()).set_path(config.path.clone());
        if let Some(domain) = config.domain.as_deref().or(host) {
            cookie = cookie.set_domain(domain.to_owned());
        }
        response.insert(cookie);
    }
}

/// Parse cookies out of the `Cookie` headers of an incoming request.
///
/// Parsing is best-effort: a malformed header is logged and skipped,
/// the well-formed ones are kept.
pub fn extract_request_cookies<'request>(
    headers: &'request HeaderMap,
    processor: &Processor,
) -> RequestCookies<'request> {
    fn extract_request_cookie<'request>(
        header: &'request HeaderValue,
        processor: &Processor,
        cookies: &mut RequestCookies<'request>,
    ) -> Result<(), InvalidCookieHeader> {
        let header = header.to_str().map_err(InvalidCookieHeader::NotUtf8)?;
        cookies
            .extend_from_header(header, processor)
            .map_err(InvalidCookieHeader::Parse)
    }

    let mut cookies = RequestCookies::new();
    for header in headers.get_all(COOKIE) {
        if let Err(e) = extract_request_cookie(header, processor, &mut cookies) {
            log_error!(
                e,
                level: tracing::Level::WARN,
                "A request cookie is invalid, ignoring it"
            );
        }
    }
    cookies
}

/// Attach the queued cookies to the outgoing response, as `Set-Cookie` headers.
///
/// It consumes [`ResponseCookies`] by value since no cookies should be
/// queued after this point.
pub fn inject_response_cookies<B>(
    mut response: http::Response<B>,
    response_cookies: ResponseCookies<'static>,
    processor: &Processor,
) -> Result<http::Response<B>, InjectResponseCookiesError> {
    for value in response_cookies.header_values(processor) {
        let value = HeaderValue::from_str(&value).map_err(|_| InjectResponseCookiesError {
            invalid_header_value: value,
        })?;
        response.headers_mut().append(SET_COOKIE, value);
    }
    Ok(response)
}

/// The host the request was addressed to, without the port.
///
/// The `Host` header wins over the authority of the request target.
pub fn request_host(request: &http::request::Parts) -> Option<String> {
    let authority = request
        .headers
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .or_else(|| request.uri.authority().map(|a| a.as_str()))?;
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let host = if authority.starts_with('[') {
        // IPv6 literal
        match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        }
    } else {
        authority.split(':').next().unwrap_or(authority)
    };
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

/// Errors that can occur when moving cookies in and out of HTTP messages.
pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// A `Cookie` header that couldn't be parsed.
    pub enum InvalidCookieHeader {
        #[error("The `Cookie` header is not valid UTF-8")]
        NotUtf8(#[source] http::header::ToStrError),
        #[error("Failed to parse the `Cookie` header")]
        Parse(#[source] biscotti::errors::ParseError),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("`{invalid_header_value}` is not a valid `Set-Cookie` header value")]
    /// The error returned by [`inject_response_cookies`](super::inject_response_cookies).
    pub struct InjectResponseCookiesError {
        pub invalid_header_value: String,
    }
}
