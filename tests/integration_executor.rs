mod common;

use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqflow::prelude::{
    Backoff, ErrorCode, HttpExecutor, JsonParser, RequestSpec, RetryPolicy, TextParser,
    TransportErrorKind,
};
use serde::Deserialize;
use serde_json::Value;

use common::{MockResponse, MockServer};

#[derive(Debug, Deserialize, PartialEq)]
struct Sample {
    a: u32,
}

fn spec_get(server: &MockServer, path: &str) -> RequestSpec {
    RequestSpec::get(server.url(path))
        .connect_timeout(Duration::from_secs(1))
        .read_timeout(Duration::from_secs(2))
}

#[test]
fn get_json_succeeds_and_sets_accept_encoding() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/json")],
        br#"{"a":1}"#.to_vec(),
    )]);

    let sample: Sample = HttpExecutor::default()
        .execute(&spec_get(&server, "/v1/sample"), &JsonParser::new())
        .expect("json call should succeed");
    assert_eq!(sample, Sample { a: 1 });

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/v1/sample");
    assert!(requests[0].body.is_empty());
    assert!(
        requests[0]
            .headers
            .get("accept-encoding")
            .is_some_and(|value| value.contains("gzip"))
    );
}

#[test]
fn server_unavailable_is_retried_then_reported() {
    let server = MockServer::start(vec![
        MockResponse::text(503, "busy"),
        MockResponse::text(503, "busy"),
        MockResponse::text(503, "busy"),
        MockResponse::text(503, "maintenance"),
    ]);
    let spec = spec_get(&server, "/v1/busy")
        .retry_policy(RetryPolicy::default().backoff(Backoff::Fixed(Duration::from_millis(10))));

    let error = HttpExecutor::default()
        .execute(&spec, &TextParser)
        .expect_err("every attempt fails");
    assert_eq!(error.code(), ErrorCode::Server);
    assert_eq!(error.status(), Some(503));
    assert_eq!(error.message(), "maintenance");
    assert_eq!(server.served_count(), 4);
}

#[test]
fn gzip_body_is_decoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"hello").expect("write gzip fixture");
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "text/plain"), ("Content-Encoding", "gzip")],
        encoder.finish().expect("finish gzip fixture"),
    )]);

    let body = HttpExecutor::default()
        .execute(&spec_get(&server, "/greeting"), &TextParser)
        .expect("gzip body should decode");
    assert_eq!(body, "hello");
}

#[test]
fn redirect_is_followed_to_relative_location() {
    let server = MockServer::start(vec![
        MockResponse::redirect(302, "/v2/landing"),
        MockResponse::text(200, "arrived"),
    ]);

    let body = HttpExecutor::default()
        .execute(&spec_get(&server, "/v1/start"), &TextParser)
        .expect("redirect should be followed");
    assert_eq!(body, "arrived");

    let paths: Vec<String> = server.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, ["/v1/start", "/v2/landing"]);
}

#[test]
fn redirect_chain_past_bound_fails() {
    let server = MockServer::start(vec![
        MockResponse::redirect(301, "/one"),
        MockResponse::redirect(301, "/two"),
    ]);
    let spec = spec_get(&server, "/").max_redirects(1);

    let error = HttpExecutor::default()
        .execute(&spec, &TextParser)
        .expect_err("two redirects exceed a bound of one");
    assert_eq!(error.code(), ErrorCode::Transport);
    assert_eq!(error.transport_kind(), Some(TransportErrorKind::RedirectLimit));
    assert_eq!(server.served_count(), 2);
    assert!(error.url().ends_with("/two"));
}

#[test]
fn post_carries_body_and_content_type() {
    let server = MockServer::start(vec![MockResponse::new(
        201,
        vec![("Content-Type", "application/json")],
        br#"{"id":"42"}"#.to_vec(),
    )]);
    let spec = RequestSpec::post(server.url("/v1/items"))
        .content_type("application/json")
        .header("X-Request-Id", "req-1")
        .body(Bytes::from_static(br#"{"name":"demo"}"#));

    let created: Value = HttpExecutor::default()
        .execute(&spec, &JsonParser::new())
        .expect("201 is within the default success range");
    assert_eq!(created["id"], "42");

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.body, br#"{"name":"demo"}"#);
    assert_eq!(
        request.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(
        request.headers.get("x-request-id").map(String::as_str),
        Some("req-1")
    );
}

#[test]
fn query_pairs_are_encoded_in_order() {
    let server = MockServer::start(vec![MockResponse::text(200, "ok")]);
    let spec = spec_get(&server, "/search").query_pairs([("q", "a b&c"), ("lang", "en")]);

    HttpExecutor::default()
        .execute(&spec, &TextParser)
        .expect("ok");
    assert_eq!(server.requests()[0].path, "/search?q=a+b%26c&lang=en");
}

#[test]
fn unsupported_scheme_is_rejected_locally() {
    let error = HttpExecutor::default()
        .execute(&RequestSpec::get("ftp://127.0.0.1/file"), &TextParser)
        .expect_err("ftp is not http");
    assert_eq!(
        error.transport_kind(),
        Some(TransportErrorKind::UnsupportedScheme)
    );
}

#[test]
fn refused_connection_is_a_transport_failure() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let spec = RequestSpec::get(format!("http://127.0.0.1:{port}/"))
        .connect_timeout(Duration::from_millis(500));

    let error = HttpExecutor::default()
        .execute(&spec, &TextParser)
        .expect_err("nothing is listening");
    assert_eq!(error.code(), ErrorCode::Transport);
}
