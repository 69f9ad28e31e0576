//! Chat completion client tests against an in-process HTTP server

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use talkback::chat::{
    ChatCompletionClient, ChatMessage, CompletionError, CredentialSource, OpenAiChatClient,
};
use talkback::session::Role;

type Seen = Arc<Mutex<Option<(HeaderMap, Value)>>>;

/// Serve `router` on an ephemeral port and return its base URL
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn key(value: &'static str) -> CredentialSource {
    Arc::new(move || Some(value.to_string()))
}

fn client(base_url: &str, credential: CredentialSource) -> OpenAiChatClient {
    OpenAiChatClient::new(base_url, "test-model", Duration::from_secs(5), credential).unwrap()
}

fn conversation() -> Vec<ChatMessage> {
    vec![
        ChatMessage::new(Role::User, "hello"),
        ChatMessage::new(Role::Assistant, "hi"),
        ChatMessage::new(Role::User, "how are you"),
    ]
}

async fn record_and_reply(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    *seen.lock().unwrap() = Some((headers, body));
    Json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12},
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": "fine, thanks"}, "finish_reason": "stop"}
        ]
    }))
}

#[tokio::test]
async fn test_successful_completion() {
    let seen: Seen = Arc::default();
    let router = Router::new()
        .route("/chat/completions", post(record_and_reply))
        .with_state(Arc::clone(&seen));
    let base_url = serve(router).await;

    let completion = client(&base_url, key("sk-test"))
        .complete(conversation())
        .await
        .unwrap();

    assert_eq!(completion.id, "chatcmpl-1");
    assert_eq!(completion.created, Some(1_700_000_000));
    assert_eq!(completion.message.role, Role::Assistant);
    assert_eq!(completion.message.content, "fine, thanks");
    assert_eq!(completion.usage.total_tokens, 12);

    let (headers, body) = seen.lock().unwrap().take().unwrap();
    assert_eq!(headers["authorization"], "Bearer sk-test");
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(
        body,
        json!({
            "model": "test-model",
            "messages": [
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": "hi"},
                {"role": "user", "content": "how are you"}
            ]
        })
    );
}

#[tokio::test]
async fn test_non_success_status_is_rejected() {
    let router = Router::new().route(
        "/chat/completions",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
    );
    let base_url = serve(router).await;

    let err = client(&base_url, key("sk-test"))
        .complete(conversation())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        CompletionError::RequestRejected {
            status: 429,
            body: "slow down".to_string(),
        }
    );
}

#[tokio::test]
async fn test_unparseable_body_is_malformed() {
    let router = Router::new().route("/chat/completions", post(|| async { "not json" }));
    let base_url = serve(router).await;

    let err = client(&base_url, key("sk-test"))
        .complete(conversation())
        .await
        .unwrap_err();

    assert!(matches!(err, CompletionError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_missing_fields_are_malformed() {
    let router = Router::new()
        .route(
            "/chat/completions",
            post(|| async { Json(json!({"id": "x", "choices": []})) }),
        )
        .route(
            "/empty/chat/completions",
            post(|| async {
                Json(json!({"id": "x", "usage": {"total_tokens": 1}, "choices": []}))
            }),
        );
    let base_url = serve(router).await;

    let no_usage = client(&base_url, key("sk-test"))
        .complete(conversation())
        .await
        .unwrap_err();
    assert!(matches!(no_usage, CompletionError::MalformedResponse(_)));

    let no_choices = client(&format!("{base_url}/empty"), key("sk-test"))
        .complete(conversation())
        .await
        .unwrap_err();
    assert_eq!(
        no_choices,
        CompletionError::MalformedResponse("no choices".to_string())
    );
}

#[tokio::test]
async fn test_missing_credential_skips_request() {
    let client = client("http://127.0.0.1:9", Arc::new(|| None::<String>));
    let err = client.complete(conversation()).await.unwrap_err();
    assert_eq!(err, CompletionError::MissingCredential);
}

#[tokio::test]
async fn test_credential_is_read_per_request() {
    let seen: Seen = Arc::default();
    let router = Router::new()
        .route("/chat/completions", post(record_and_reply))
        .with_state(Arc::clone(&seen));
    let base_url = serve(router).await;

    let current = Arc::new(Mutex::new("sk-one".to_string()));
    let source: CredentialSource = {
        let current = Arc::clone(&current);
        Arc::new(move || Some(current.lock().unwrap().clone()))
    };
    let client = client(&base_url, source);

    client.complete(conversation()).await.unwrap();
    *current.lock().unwrap() = "sk-two".to_string();
    client.complete(conversation()).await.unwrap();

    let (headers, _) = seen.lock().unwrap().take().unwrap();
    assert_eq!(headers["authorization"], "Bearer sk-two");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"), key("sk-test"))
        .complete(conversation())
        .await
        .unwrap_err();
    assert!(matches!(err, CompletionError::Transport(_)));
}
