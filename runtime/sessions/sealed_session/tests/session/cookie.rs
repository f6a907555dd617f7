//! Tests for session id resolution and the attributes of the session cookie.
use std::time::Duration;

use crate::fixtures::{SessionFixture, config, decode, encode, middleware, store};
use crate::helpers::{finalize, load, processor, request_cookies, set_cookies};
use biscotti::{RequestCookies, ResponseCookie, ResponseCookies};
use googletest::{
    assert_that, expect_that,
    prelude::{eq, none, some},
};
use sealed_session::{
    CookieRegistry, SessionId,
    cookie::{
        MintReason, SessionIdSource, extract_request_cookies, inject_response_cookies,
        request_host,
    },
};

#[tokio::test]
#[googletest::test]
async fn default_cookie_attributes() {
    let (store, config) = (store(), config());
    let middleware = middleware(&config, store);

    let mut session = load(&middleware, None).await.unwrap();
    session.insert("key", &"value").unwrap();
    let cookies = finalize(&middleware, session, Some("example.com")).await.unwrap();

    let cookie = &cookies[0];
    expect_that!(cookie.name.as_str(), eq("kitura-session-id"));
    expect_that!(cookie.attribute("Path"), some(eq("/")));
    expect_that!(cookie.attribute("Domain"), some(eq("example.com")));
    expect_that!(cookie.attribute("Max-Age"), none());
    expect_that!(cookie.has_flag("HttpOnly"), eq(true));
    expect_that!(cookie.has_flag("Secure"), eq(false));
}

#[tokio::test]
#[googletest::test]
async fn cookie_attributes_can_be_changed() {
    let (store, mut config) = (store(), config());
    config.cookie.name = "my-custom-cookie-name".into();
    config.cookie.domain = Some("my-domain.com".into());
    config.cookie.path = "/custom-path".into();
    config.cookie.secure = true;
    config.cookie.http_only = false;
    config.cookie.max_age = Some(Duration::from_secs(30 * 60));
    let middleware = middleware(&config, store);

    let mut session = load(&middleware, None).await.unwrap();
    session.insert("key", &"value").unwrap();
    let cookies = finalize(&middleware, session, Some("example.com")).await.unwrap();

    let cookie = &cookies[0];
    expect_that!(cookie.name.as_str(), eq("my-custom-cookie-name"));
    // The configured domain wins over the request host.
    expect_that!(cookie.attribute("Domain"), some(eq("my-domain.com")));
    expect_that!(cookie.attribute("Path"), some(eq("/custom-path")));
    expect_that!(cookie.attribute("Max-Age"), some(eq("1800")));
    expect_that!(cookie.has_flag("Secure"), eq(true));
    expect_that!(cookie.has_flag("HttpOnly"), eq(false));
}

#[tokio::test]
async fn zero_max_age_is_omitted() {
    let (store, mut config) = (store(), config());
    config.cookie.max_age = Some(Duration::ZERO);
    let middleware = middleware(&config, store);

    let mut session = load(&middleware, None).await.unwrap();
    session.insert("key", &"value").unwrap();
    let cookies = finalize(&middleware, session, None).await.unwrap();

    assert_that!(cookies[0].attribute("Max-Age"), none());
}

#[tokio::test]
async fn domain_is_omitted_when_neither_configured_nor_known() {
    let (store, config) = (store(), config());
    let middleware = middleware(&config, store);

    let mut session = load(&middleware, None).await.unwrap();
    session.insert("key", &"value").unwrap();
    let cookies = finalize(&middleware, session, None).await.unwrap();

    assert_that!(cookies[0].attribute("Domain"), none());
}

#[tokio::test]
async fn removal_cookie_carries_the_same_path_and_domain() {
    let (store, mut config) = (store(), config());
    config.cookie.path = "/app".into();
    let fixture = SessionFixture::with_state(serde_json::json!({ "user_id": 42 }));
    let cookie_header = fixture.setup(&config, &store).await;
    let middleware = middleware(&config, store);

    let mut session = load(&middleware, Some(&cookie_header)).await.unwrap();
    session.destroy().await.unwrap();
    let cookies = finalize(&middleware, session, Some("example.com")).await.unwrap();

    assert_that!(cookies[0].attribute("Path"), some(eq("/app")));
    assert_that!(cookies[0].attribute("Domain"), some(eq("example.com")));
}

#[test]
fn cookie_value_is_opaque() {
    let config = config();
    let id = SessionId::random();
    let value = encode(&config, &id);

    let segments: Vec<_> = value.split('.').collect();
    assert_eq!(segments.len(), 3);
    assert!(!value.contains(&id.to_string()));
    // A fresh IV is used every time.
    assert_ne!(value, encode(&config, &id));
    assert_eq!(decode(&config, &value), id);
}

#[test]
fn request_cookie_is_preferred_over_the_response_cookie() {
    let registry = CookieRegistry::new();
    let config = config();
    let manager = registry.manager(&config.cookie, &config.secret);

    let from_request = SessionId::random();
    let from_response = SessionId::random();
    let header = format!("{}={}", config.cookie.name, encode(&config, &from_request));
    let request = request_cookies(&header);
    let mut response = ResponseCookies::new();
    manager.add_cookie(&from_response, None, &mut response).unwrap();

    let incoming = manager.get_session_id(&request, &response);
    assert_eq!(incoming.id, from_request);
    assert!(matches!(incoming.source, SessionIdSource::RequestCookie));

    let incoming = manager.get_session_id(&RequestCookies::new(), &response);
    assert_eq!(incoming.id, from_response);
    assert!(matches!(incoming.source, SessionIdSource::ResponseCookie));
}

#[test]
fn invalid_request_cookie_falls_back_to_the_response_cookie() {
    let registry = CookieRegistry::new();
    let config = config();
    let manager = registry.manager(&config.cookie, &config.secret);

    let from_response = SessionId::random();
    let header = format!("{}=garbage", config.cookie.name);
    let request = request_cookies(&header);
    let mut response = ResponseCookies::new();
    manager.add_cookie(&from_response, None, &mut response).unwrap();

    let incoming = manager.get_session_id(&request, &response);
    assert_eq!(incoming.id, from_response);
    assert!(!incoming.is_new());
}

#[test]
fn tampered_cookie_is_invalid() {
    let registry = CookieRegistry::new();
    let config = config();
    let manager = registry.manager(&config.cookie, &config.secret);

    let value = encode(&config, &SessionId::random());
    let (rest, signature) = value.rsplit_once('.').unwrap();
    let mut signature = signature.to_owned();
    let flipped = if signature.starts_with('0') { "1" } else { "0" };
    signature.replace_range(0..1, flipped);
    let header = format!("{}={rest}.{signature}", config.cookie.name);

    let incoming = manager.get_session_id(&request_cookies(&header), &ResponseCookies::new());
    assert!(matches!(
        incoming.source,
        SessionIdSource::Minted(MintReason::InvalidCookie(_))
    ));
}

#[test]
fn other_cookies_are_ignored() {
    let registry = CookieRegistry::new();
    let config = config();
    let manager = registry.manager(&config.cookie, &config.secret);

    let request = request_cookies("theme=dark; lang=en");
    let mut response = ResponseCookies::new();
    response.insert(ResponseCookie::new("tracking", "abc"));

    let incoming = manager.get_session_id(&request, &response);
    assert!(matches!(
        incoming.source,
        SessionIdSource::Minted(MintReason::NoCookie)
    ));
    assert!(!manager.cookie_exists(&response));
}

#[test]
fn removal_cookies_are_not_mistaken_for_session_cookies() {
    let registry = CookieRegistry::new();
    let config = config();
    let manager = registry.manager(&config.cookie, &config.secret);

    let mut response = ResponseCookies::new();
    manager.remove_cookie(None, &mut response);

    assert!(!manager.cookie_exists(&response));
    assert_that!(manager.decode_response_cookie(&response), none());
}

#[test]
fn request_cookies_can_be_extracted_from_headers() {
    let mut headers = http::HeaderMap::new();
    headers.append(http::header::COOKIE, "a=1; b=2".parse().unwrap());
    headers.append(http::header::COOKIE, "c=3".parse().unwrap());

    let processor = processor();
    let cookies = extract_request_cookies(&headers, &processor);
    assert_eq!(cookies.get("a").unwrap().value(), "1");
    assert_eq!(cookies.get("b").unwrap().value(), "2");
    assert_eq!(cookies.get("c").unwrap().value(), "3");
}

#[test]
fn response_cookies_are_injected_as_set_cookie_headers() {
    let mut response_cookies = ResponseCookies::new();
    response_cookies.insert(ResponseCookie::new("a", "1"));
    response_cookies.insert(ResponseCookie::new("b", "2"));

    let response = inject_response_cookies(
        http::Response::new(String::new()),
        response_cookies,
        &processor(),
    )
    .unwrap();
    let headers: Vec<_> = response
        .headers()
        .get_all(http::header::SET_COOKIE)
        .into_iter()
        .map(|v| v.to_str().unwrap().to_owned())
        .collect();
    assert_eq!(headers.len(), 2);
    assert!(headers.iter().any(|h| h.starts_with("a=1")));
    assert!(headers.iter().any(|h| h.starts_with("b=2")));
}

#[test]
fn host_is_taken_from_the_host_header() {
    let (parts, _) = http::Request::builder()
        .uri("http://ignored.org/path")
        .header("Host", "Example.COM:8080")
        .body(())
        .unwrap()
        .into_parts();
    assert_eq!(request_host(&parts).as_deref(), Some("example.com"));

    let (parts, _) = http::Request::builder()
        .uri("http://fallback.org:3000/path")
        .body(())
        .unwrap()
        .into_parts();
    assert_eq!(request_host(&parts).as_deref(), Some("fallback.org"));

    let (parts, _) = http::Request::builder()
        .uri("/path")
        .body(())
        .unwrap()
        .into_parts();
    assert_eq!(request_host(&parts), None);
}

#[test]
fn queued_cookie_is_rendered_with_the_encoded_id() {
    let registry = CookieRegistry::new();
    let config = config();
    let manager = registry.manager(&config.cookie, &config.secret);
    let id = SessionId::random();

    let mut response = ResponseCookies::new();
    manager.add_cookie(&id, Some("example.com"), &mut response).unwrap();

    let cookies = set_cookies(response);
    assert_eq!(cookies.len(), 1);
    assert_eq!(decode(&config, &cookies[0].value), id);
}

#[test]
fn withdrawing_only_discards_the_cookie_if_it_was_not_replaced() {
    let registry = CookieRegistry::new();
    let config = config();
    let manager = registry.manager(&config.cookie, &config.secret);
    let id = SessionId::random();

    let mut response = ResponseCookies::new();
    let first = manager.add_cookie(&id, Some("example.com"), &mut response).unwrap();
    let second = manager.add_cookie(&id, Some("example.com"), &mut response).unwrap();
    assert_ne!(first, second);

    // The cookie was re-queued in the meantime: it stays.
    assert!(!manager.withdraw_cookie(&first, Some("example.com"), &mut response));
    assert!(manager.cookie_exists(&response));

    assert!(manager.withdraw_cookie(&second, Some("example.com"), &mut response));
    assert!(!manager.cookie_exists(&response));
    assert!(set_cookies(response).is_empty());
}
