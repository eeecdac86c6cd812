use std::time::Duration;

use harvest_engine::{Credentials, FailureKind, FetchSettings, HttpSession, ReqwestSession};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED: &str = "<feed xmlns=\"http://www.w3.org/2005/Atom\"/>";

fn credentials() -> Credentials {
    Credentials {
        username: "user".to_string(),
        password: "pass".to_string(),
    }
}

#[tokio::test]
async fn session_sends_basic_auth_and_returns_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .and(header("Authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(FEED, "application/atom+xml; charset=utf-8"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = ReqwestSession::new(FetchSettings::default(), Some(credentials())).unwrap();
    let url = format!("{}/groups", server.uri());

    let output = session.get(&url).await.expect("fetch ok");
    assert_eq!(output.metadata.url, url);
    assert_eq!(output.metadata.final_url, url);
    assert_eq!(output.metadata.status, 200);
    assert_eq!(output.metadata.byte_len, FEED.len() as u64);
    assert!(output
        .metadata
        .content_type
        .unwrap()
        .starts_with("application/atom+xml"));
    assert_eq!(output.bytes, FEED.as_bytes());
}

#[tokio::test]
async fn session_fails_on_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let session = ReqwestSession::new(FetchSettings::default(), None).unwrap();
    let url = format!("{}/missing", server.uri());

    let err = session.get(&url).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(404));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let session = ReqwestSession::new(FetchSettings::default(), None).unwrap();
    let err = session.get(&server.uri()).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(503));
    assert!(err.is_transient());
}

#[tokio::test]
async fn rejected_credentials_are_reported_as_such() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let session = ReqwestSession::new(FetchSettings::default(), Some(credentials())).unwrap();
    let err = session.get(&server.uri()).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Unauthorized);
}

#[tokio::test]
async fn session_times_out_on_slow_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_raw(FEED, "application/atom+xml"),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        request_timeout: Duration::from_millis(50),
        ..FetchSettings::default()
    };
    let session = ReqwestSession::new(settings, None).unwrap();
    let url = format!("{}/slow", server.uri());

    let err = session.get(&url).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
    assert!(err.is_transient());
}

#[tokio::test]
async fn session_rejects_too_large_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/large"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/xml")
                .insert_header("Content-Length", "11")
                .set_body_string("01234567890"),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        max_bytes: 10,
        ..FetchSettings::default()
    };
    let session = ReqwestSession::new(settings, None).unwrap();
    let url = format!("{}/large", server.uri());

    let err = session.get(&url).await.unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::TooLarge {
            max_bytes: 10,
            actual: Some(11)
        }
    );
}

#[tokio::test]
async fn session_rejects_html_login_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html/>", "text/html"))
        .mount(&server)
        .await;

    let session = ReqwestSession::new(FetchSettings::default(), None).unwrap();
    let err = session.get(&server.uri()).await.unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::UnsupportedContentType {
            content_type: "text/html".to_string()
        }
    );
}

#[tokio::test]
async fn invalid_url_fails_before_any_request() {
    let session = ReqwestSession::new(FetchSettings::default(), None).unwrap();
    let err = session.get("not a url").await.unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidUrl);
}

#[test]
fn credentials_debug_hides_the_password() {
    let rendered = format!("{:?}", credentials());
    assert!(rendered.contains("user"));
    assert!(!rendered.contains("\"pass\""));
}
