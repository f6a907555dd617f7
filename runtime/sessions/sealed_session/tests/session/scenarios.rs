//! End-to-end flows: a client talking to a server over several requests.
use crate::fixtures::{config, decode};
use crate::helpers::{Browser, serve, session_cookie};
use googletest::{assert_that, prelude::none};
use http::Method;
use sealed_session::{Session, SessionMiddleware};
use sealed_session_memory_store::InMemorySessionKit;

/// `POST` stores the request body under `sessionKey`, `GET` returns it.
fn handler(session: &mut Session, body: String) -> String {
    if body.is_empty() {
        session
            .get::<String>("sessionKey")
            .unwrap()
            .unwrap_or_default()
    } else {
        session.insert("sessionKey", &body).unwrap();
        String::new()
    }
}

fn app() -> SessionMiddleware {
    InMemorySessionKit::new(config()).build(&Default::default())
}

#[tokio::test]
async fn state_survives_across_requests() {
    let app = app();
    let mut browser = Browser::default();

    let response = serve(&app, browser.request(Method::POST, "/3/session", "sessionValue"), handler).await;
    assert_eq!(response.status(), http::StatusCode::OK);
    browser.remember(&response, "kitura-session-id");
    assert!(browser.cookie_header().is_some());

    let response = serve(&app, browser.request(Method::GET, "/3/session", ""), handler).await;
    assert_eq!(response.body(), "sessionValue");
    // The client's cookie is still valid: there's no need to resend it.
    assert_that!(session_cookie(&response, "kitura-session-id"), none());
}

#[tokio::test]
async fn a_request_that_does_not_touch_the_session_gets_no_cookie() {
    let app = app();
    let browser = Browser::default();

    let response = serve(&app, browser.request(Method::GET, "/", ""), handler).await;
    assert_eq!(response.body(), "");
    assert_that!(session_cookie(&response, "kitura-session-id"), none());
}

#[tokio::test]
async fn different_clients_get_different_sessions() {
    let app = app();
    let config = config();
    let (mut alice, mut bob) = (Browser::default(), Browser::default());

    let response = serve(&app, alice.request(Method::POST, "/", "alice"), handler).await;
    alice.remember(&response, &config.cookie.name);
    let response = serve(&app, bob.request(Method::POST, "/", "bob"), handler).await;
    bob.remember(&response, &config.cookie.name);

    let alice_cookie = alice.cookie_header().unwrap();
    let bob_cookie = bob.cookie_header().unwrap();
    let (_, alice_value) = alice_cookie.split_once('=').unwrap();
    let (_, bob_value) = bob_cookie.split_once('=').unwrap();
    assert_ne!(decode(&config, alice_value), decode(&config, bob_value));

    let response = serve(&app, alice.request(Method::GET, "/", ""), handler).await;
    assert_eq!(response.body(), "alice");
    let response = serve(&app, bob.request(Method::GET, "/", ""), handler).await;
    assert_eq!(response.body(), "bob");
}

#[tokio::test]
async fn tampered_cookie_leads_to_a_new_session() {
    let app = app();
    let config = config();
    let mut browser = Browser::default();

    let response = serve(&app, browser.request(Method::POST, "/", "secret stuff"), handler).await;
    browser.remember(&response, &config.cookie.name);
    let (_, value) = browser.cookie_header().unwrap().split_once('=').unwrap();
    let original = decode(&config, value);

    let mut tampered = value.to_owned();
    tampered.pop();
    tampered.push(if value.ends_with('0') { '1' } else { '0' });
    browser.tamper_with_cookie(&tampered);

    // The state attached to the original session is out of reach.
    let response = serve(&app, browser.request(Method::GET, "/", ""), handler).await;
    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(response.body(), "");

    // Writing to the new session hands out a cookie for a different id.
    let response = serve(&app, browser.request(Method::POST, "/", "fresh"), handler).await;
    let cookie = session_cookie(&response, &config.cookie.name).unwrap();
    assert_ne!(decode(&config, &cookie.value), original);
}
