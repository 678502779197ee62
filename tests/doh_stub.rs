// DoH client tests against an in-process stub resolver.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use vlessgate::dns::DohClient;

/// Stub resolver that records each request and echoes the query bytes back.
async fn start_stub(seen: mpsc::UnboundedSender<(Option<String>, Bytes)>) -> SocketAddr {
    let app = Router::new().route(
        "/dns-query",
        post(move |headers: HeaderMap, body: Bytes| {
            let seen = seen.clone();
            async move {
                let content_type = headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                seen.send((content_type, body.clone())).unwrap();
                ([(CONTENT_TYPE, "application/dns-message")], body)
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn posts_wire_format_query_and_returns_reply_body() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let addr = start_stub(tx).await;

    let client = DohClient::new(format!("http://{addr}/dns-query")).unwrap();
    let query = Bytes::from(vec![0x5a; 29]);
    let reply = client.query(query.clone()).await.unwrap();

    assert_eq!(reply, query);

    let (content_type, body) = rx.recv().await.unwrap();
    assert_eq!(content_type.as_deref(), Some("application/dns-message"));
    assert_eq!(body, query);
}

#[tokio::test]
async fn http_error_status_surfaces_as_query_error() {
    let app = Router::new().route(
        "/dns-query",
        post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = DohClient::new(format!("http://{addr}/dns-query")).unwrap();
    let err = client.query(Bytes::from_static(b"query")).await.unwrap_err();
    assert!(err.to_string().contains("503"));
}
