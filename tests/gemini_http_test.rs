//! GeminiClient against a local mock HTTP server. No real API calls.
//!
//! Run: cargo test --test gemini_http_test

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mockito::Matcher;
use serde_json::json;
use smart_studio_lib::ai::gemini::GeminiClient;
use smart_studio_lib::ai::{AiError, AiProvider};

const API_KEY: &str = "test-key";

fn client(server: &mockito::ServerGuard) -> GeminiClient {
    GeminiClient::new(API_KEY)
        .with_base_url(server.url())
        .with_models("chat-model", "image-model")
}

fn sse(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|e| format!("data: {e}\r\n\r\n"))
        .collect()
}

fn text_event(text: &str) -> serde_json::Value {
    json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }] })
}

async fn collect(stream: &mut Box<dyn smart_studio_lib::ai::TextStream>) -> Vec<String> {
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next_chunk().await {
        chunks.push(chunk.expect("chunk should succeed"));
    }
    chunks
}

#[tokio::test]
async fn edit_image_sends_inline_data_and_parses_result() {
    let mut server = mockito::Server::new_async().await;
    let edited = vec![9u8, 8, 7, 6];
    let response = json!({
        "candidates": [{
            "content": {
                "parts": [
                    { "text": "Here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(&edited) } }
                ]
            }
        }]
    });
    let mock = server
        .mock("POST", "/v1beta/models/image-model:generateContent")
        .match_header("x-goog-api-key", API_KEY)
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({
                "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] }
            })),
            Matcher::Regex(format!(r#""data":"{}""#, BASE64.encode([1u8, 2, 3]))),
            Matcher::Regex(r#""mimeType":"image/jpeg""#.into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(response.to_string())
        .create_async()
        .await;

    let result = client(&server)
        .edit_image(&[1, 2, 3], "image/jpeg", "add a hat")
        .await
        .unwrap()
        .expect("image part present");

    assert_eq!(result.mime_type, "image/png");
    assert_eq!(result.data, edited);
    mock.assert_async().await;
}

#[tokio::test]
async fn edit_image_without_image_part_is_none() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1beta/models/image-model:generateContent")
        .with_status(200)
        .with_body(json!({ "candidates": [{ "content": { "parts": [{ "text": "sorry" }] } }] }).to_string())
        .create_async()
        .await;

    let result = client(&server).edit_image(&[1], "image/png", "x").await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn http_errors_are_classified() {
    let mut server = mockito::Server::new_async().await;
    let _unauthorized = server
        .mock("POST", "/v1beta/models/image-model:generateContent")
        .with_status(403)
        .with_body("API key not valid")
        .create_async()
        .await;

    let err = client(&server).edit_image(&[1], "image/png", "x").await.unwrap_err();
    assert!(matches!(err, AiError::AuthError(ref body) if body.contains("API key not valid")));

    let mut server = mockito::Server::new_async().await;
    let _limited = server
        .mock("POST", "/v1beta/models/image-model:generateContent")
        .with_status(429)
        .create_async()
        .await;
    let err = client(&server).edit_image(&[1], "image/png", "x").await.unwrap_err();
    assert!(matches!(err, AiError::RateLimited { .. }));
}

#[tokio::test]
async fn chat_streams_sse_fragments() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock(
            "POST",
            Matcher::Regex(r"^/v1beta/models/chat-model:streamGenerateContent".into()),
        )
        .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
        .match_header("x-goog-api-key", API_KEY)
        .match_body(Matcher::PartialJson(json!({
            "systemInstruction": { "parts": [{ "text": "be brief" }] }
        })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse(&[text_event("مر"), text_event("حبا"), text_event(" بك")]))
        .create_async()
        .await;

    let mut chat = client(&server).start_chat("be brief");
    let mut stream = chat.send_message_stream("مرحبا").await.unwrap();
    assert_eq!(collect(&mut stream).await, vec!["مر", "حبا", " بك"]);
    mock.assert_async().await;
}

#[tokio::test]
async fn completed_turns_are_replayed_on_the_next_message() {
    let mut server = mockito::Server::new_async().await;
    let path = Matcher::Regex(r"^/v1beta/models/chat-model:streamGenerateContent".into());
    let first = server
        .mock("POST", path.clone())
        .with_status(200)
        .with_body(sse(&[text_event("Hi there")]))
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("POST", path)
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""role":"model""#.into()),
            Matcher::Regex("Hi there".into()),
            Matcher::Regex("how are you".into()),
        ]))
        .with_status(200)
        .with_body(sse(&[text_event("Fine")]))
        .expect(1)
        .create_async()
        .await;

    let mut chat = client(&server).start_chat("");
    let mut stream = chat.send_message_stream("hello").await.unwrap();
    assert_eq!(collect(&mut stream).await, vec!["Hi there"]);

    let mut stream = chat.send_message_stream("how are you").await.unwrap();
    assert_eq!(collect(&mut stream).await, vec!["Fine"]);

    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn error_event_mid_stream_is_reported() {
    let mut server = mockito::Server::new_async().await;
    let body = sse(&[
        text_event("partial"),
        json!({ "error": { "code": 500, "message": "internal", "status": "INTERNAL" } }),
    ]);
    let _mock = server
        .mock(
            "POST",
            Matcher::Regex(r"^/v1beta/models/chat-model:streamGenerateContent".into()),
        )
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let mut chat = client(&server).start_chat("");
    let mut stream = chat.send_message_stream("hello").await.unwrap();
    assert_eq!(stream.next_chunk().await.unwrap().unwrap(), "partial");
    assert!(matches!(
        stream.next_chunk().await,
        Some(Err(AiError::ModelError(ref msg))) if msg.contains("INTERNAL")
    ));
    assert!(stream.next_chunk().await.is_none());
}

#[tokio::test]
async fn server_error_fails_the_send() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock(
            "POST",
            Matcher::Regex(r"^/v1beta/models/chat-model:streamGenerateContent".into()),
        )
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let mut chat = client(&server).start_chat("");
    let err = chat.send_message_stream("hello").await.err().unwrap();
    assert!(matches!(err, AiError::ConnectionError(ref msg) if msg == "HTTP 500: boom"));
}
