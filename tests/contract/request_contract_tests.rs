//! Contract tests for the requests the client sends to the chat API.
//!
//! The server expects `POST {base}/chat/{id}/message` with `{"message"}`
//! to start generation, and `POST {base}/chat/{id}/resume` with
//! `{"lastSeenIndex", "message"}` to continue it.

use std::time::Duration;

use serde_json::json;

use brambles_stream::config::GlobalConfig;
use brambles_stream::stream::{HttpTransport, OpenRequest};

fn start() -> OpenRequest {
    OpenRequest::Start {
        task_id: "8f14e45f-ceea-467f-a0e6-1d2b5a1c0f3e".into(),
        message: "Tell me a story".into(),
    }
}

fn resume(last_seen_index: u64) -> OpenRequest {
    OpenRequest::Resume {
        task_id: "8f14e45f-ceea-467f-a0e6-1d2b5a1c0f3e".into(),
        message: "Tell me a story".into(),
        last_seen_index,
    }
}

#[test]
fn start_targets_message_endpoint() {
    assert_eq!(
        start().path(),
        "/chat/8f14e45f-ceea-467f-a0e6-1d2b5a1c0f3e/message"
    );
    assert_eq!(start().mode(), "start");
}

#[test]
fn resume_targets_resume_endpoint() {
    assert_eq!(
        resume(3).path(),
        "/chat/8f14e45f-ceea-467f-a0e6-1d2b5a1c0f3e/resume"
    );
    assert_eq!(resume(3).mode(), "resume");
}

#[test]
fn start_body_carries_only_message() {
    let body = serde_json::to_value(start().body()).expect("serializes");

    assert_eq!(body, json!({ "message": "Tell me a story" }));
}

#[test]
fn resume_body_uses_camel_case_index() {
    let body = serde_json::to_value(resume(12).body()).expect("serializes");

    assert_eq!(
        body,
        json!({ "lastSeenIndex": 12, "message": "Tell me a story" })
    );
}

#[test]
fn url_joins_base_without_double_slash() {
    let transport = HttpTransport::new(
        "http://localhost:8080/api/v1/",
        None,
        Duration::from_secs(1),
    )
    .expect("client builds");

    assert_eq!(
        transport.url_for(&resume(1)),
        "http://localhost:8080/api/v1/chat/8f14e45f-ceea-467f-a0e6-1d2b5a1c0f3e/resume"
    );
}

#[test]
fn transport_from_config_uses_base_url() {
    let config = GlobalConfig::from_toml_str(r#"base_url = "https://chat.example.com/api/v1""#)
        .expect("config parses");
    let transport = HttpTransport::from_config(&config).expect("client builds");

    assert_eq!(
        transport.url_for(&start()),
        "https://chat.example.com/api/v1/chat/8f14e45f-ceea-467f-a0e6-1d2b5a1c0f3e/message"
    );
}
