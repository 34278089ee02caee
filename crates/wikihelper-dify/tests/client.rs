//! Client tests against a local one-shot HTTP server.

use std::collections::BTreeMap;

use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wikihelper_dify::client::{DifyClient, DifyConfig};
use wikihelper_dify::error::DifyError;
use wikihelper_dify::stream::AnswerAssembler;
use wikihelper_dify::wire::DEFAULT_USER;

const API_KEY: &str = "app-test-key";

/// What the server saw: the lowercased request line and headers, and the body.
struct Captured {
    head: String,
    body: serde_json::Value,
}

/// Serve exactly one request with the given status, content type and body.
/// Returns a client pointed at the server and a handle to the captured request.
async fn serve_once(
    status: &'static str,
    content_type: &'static str,
    body: &'static str,
) -> (DifyClient, JoinHandle<Captured>) {
    serve_raw_once(format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    ))
    .await
}

/// Like [`serve_once`], but writes `response` verbatim.
async fn serve_raw_once(response: String) -> (DifyClient, JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .map(|v| v.trim().parse::<usize>().unwrap())
            .unwrap_or(0);
        while buf.len() < head_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before body");
            buf.extend_from_slice(&chunk[..n]);
        }
        let request_body = serde_json::from_slice(&buf[head_end..head_end + content_length]).unwrap();

        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();

        Captured {
            head,
            body: request_body,
        }
    });

    let mut config = DifyConfig::new(API_KEY);
    config.base_url = format!("http://{addr}/v1");
    (DifyClient::new(config).unwrap(), handle)
}

#[tokio::test]
async fn streaming_chat_sends_headers_and_decodes_body() {
    let (client, server) = serve_once(
        "200 OK",
        "text/event-stream",
        "data: {\"event\": \"message\", \"answer\": \"Hi \", \"conversation_id\": \"c-9\"}\n\n\
         data: {\"event\": \"message\", \"answer\": \"there\", \"conversation_id\": \"c-9\"}\n\n\
         data: {\"event\": \"message_end\", \"conversation_id\": \"c-9\", \"message_id\": \"m-9\"}\n\n",
    )
    .await;

    let mut events = client
        .stream_chat_message("greet me", Some("c-9"), Vec::new())
        .await
        .unwrap();
    let mut assembler = AnswerAssembler::new();
    while let Some(event) = events.next().await {
        assembler.apply(&event.unwrap());
    }

    assert!(assembler.is_finished());
    assert_eq!(assembler.text(), "Hi there");
    assert_eq!(assembler.message_id(), Some("m-9"));

    let captured = server.await.unwrap();
    assert!(captured.head.starts_with("post /v1/chat-messages http/1.1\r\n"));
    assert!(captured.head.contains("authorization: bearer app-test-key\r\n"));
    assert!(captured.head.contains("accept: text/event-stream\r\n"));
    assert_eq!(captured.body["query"], "greet me");
    assert_eq!(captured.body["user"], DEFAULT_USER);
    assert_eq!(captured.body["conversation_id"], "c-9");
    assert_eq!(captured.body["response_mode"], "streaming");
}

#[tokio::test]
async fn completion_posts_blocking_inputs() {
    let (client, server) = serve_once(
        "200 OK",
        "application/json",
        r#"{"answer": "Ship on Tuesdays.", "message_id": "m-1"}"#,
    )
    .await;

    let inputs = BTreeMap::from([("topic".to_string(), "release".to_string())]);
    let response = client.send_completion_message(inputs).await.unwrap();
    assert_eq!(response.answer, "Ship on Tuesdays.");
    assert_eq!(response.message_id.as_deref(), Some("m-1"));

    let captured = server.await.unwrap();
    assert!(captured.head.starts_with("post /v1/completion-messages http/1.1\r\n"));
    assert!(captured.head.contains("authorization: bearer app-test-key\r\n"));
    assert!(!captured.head.contains("text/event-stream"));
    assert_eq!(
        captured.body,
        serde_json::json!({
            "inputs": {"topic": "release"},
            "user": DEFAULT_USER,
            "response_mode": "blocking",
        })
    );
}

#[tokio::test]
async fn blocking_chat_returns_conversation() {
    let (client, server) = serve_once(
        "200 OK",
        "application/json",
        r#"{"answer": "42", "conversation_id": "c-1", "message_id": "m-1",
            "metadata": {"retriever_resources": [{"document_name": "Guide"}]}}"#,
    )
    .await;

    let response = client.send_chat_message("meaning?", None, Vec::new()).await.unwrap();
    assert_eq!(response.answer, "42");
    assert_eq!(response.conversation_id.as_deref(), Some("c-1"));
    assert_eq!(response.metadata.unwrap().retriever_resources[0].document_name, "Guide");

    let captured = server.await.unwrap();
    assert_eq!(captured.body["response_mode"], "blocking");
    assert!(captured.body.get("conversation_id").is_none());
}

#[tokio::test]
async fn rejected_request_surfaces_api_error() {
    let (client, server) = serve_once(
        "400 Bad Request",
        "application/json",
        r#"{"code": "invalid_param", "message": "query is required", "status": 400}"#,
    )
    .await;

    let err = client.send_chat_message("", None, Vec::new()).await.unwrap_err();
    match err {
        DifyError::Api {
            status,
            code,
            message,
        } => {
            assert_eq!(status, Some(400));
            assert_eq!(code, "invalid_param");
            assert_eq!(message, "query is required");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_stream_surfaces_api_error() {
    let (client, server) = serve_once(
        "401 Unauthorized",
        "application/json",
        r#"{"code": "unauthorized", "message": "Access token is invalid", "status": 401}"#,
    )
    .await;

    let result = client.stream_chat_message("hi", None, Vec::new()).await;
    assert!(matches!(
        result,
        Err(DifyError::Api { ref code, status: Some(401), .. }) if code == "unauthorized"
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn unreadable_error_body_keeps_status() {
    // The body is cut short of its declared length.
    let (client, server) = serve_raw_once(
        "HTTP/1.1 502 Bad Gateway\r\nContent-Type: application/json\r\nContent-Length: 100\r\nConnection: close\r\n\r\n{\"code\":"
            .to_string(),
    )
    .await;

    let err = client.send_chat_message("hi", None, Vec::new()).await.unwrap_err();
    match err {
        DifyError::Api { status, code, message } => {
            assert_eq!(status, Some(502));
            assert_eq!(code, "Bad Gateway");
            assert!(message.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    server.await.unwrap();
}
