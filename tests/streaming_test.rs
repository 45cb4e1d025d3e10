//! End-to-end tests: controller, negotiator and transports against a mock backend.

mod common;

use std::time::{Duration, Instant};

use common::{Behaviour, Recorder, Reply, controller, controller_with_budget, spawn_backend};
use ragchat::chat::controller::ControllerState;
use ragchat::chat::{ChatError, FAILURE_PREFIX};
use ragchat::stream::TransportKind;
use serde_json::json;

#[tokio::test]
async fn test_eventsource_streams_tokens_in_order() {
    let (backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::sse(vec![
            "data: Retrieval\n\n",
            "data: is\n\n",
            "data: augmented\n\n",
            "data: [DONE]\n\n",
        ]),
        ..Behaviour::default()
    })
    .await;

    let mut chat = controller(&origin);
    let mut recorder = Recorder::default();
    let message = chat.ask("What is RAG?", &mut recorder).await.unwrap();

    assert_eq!(message.text, "Retrievalisaugmented");
    assert_eq!(message.transport, Some(TransportKind::EventSource));
    assert!(!message.is_error);
    assert_eq!(
        recorder.snapshots,
        vec!["Retrieval", "Retrievalis", "Retrievalisaugmented"]
    );
    assert_eq!(recorder.finished, vec![false]);
    assert!(recorder.replaced.is_empty());
    assert_eq!(chat.state(), ControllerState::Completed);

    // Question travels URL-encoded in the query string
    assert_eq!(
        backend.detailed_log(),
        vec!["eventsource:What is RAG?", "similarity:What is RAG?"]
    );
}

#[tokio::test]
async fn test_tokens_after_done_are_ignored() {
    let (_backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::sse(vec![
            "data: a\n\ndata: [DONE]\n\n",
            "data: b\n\ndata: [DONE]\n\n",
        ]),
        ..Behaviour::default()
    })
    .await;

    let mut recorder = Recorder::default();
    let message = controller(&origin)
        .ask("q", &mut recorder)
        .await
        .unwrap();

    assert_eq!(message.text, "a");
    assert_eq!(recorder.tokens, vec!["a"]);
    assert_eq!(recorder.finished.len(), 1);
}

#[tokio::test]
async fn test_chunked_post_reassembles_split_frame() {
    let (backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::Status(axum::http::StatusCode::NOT_FOUND),
        post_stream: Reply::sse(vec![
            "data: {\"token\":\"Hel",
            "lo\"}\n",
            "data: [DONE]\n",
        ]),
        ..Behaviour::default()
    })
    .await;

    let mut recorder = Recorder::default();
    let message = controller(&origin)
        .ask("greet me", &mut recorder)
        .await
        .unwrap();

    assert_eq!(recorder.tokens, vec!["Hello"]);
    assert_eq!(message.text, "Hello");
    assert_eq!(message.transport, Some(TransportKind::PostFetch));
    // Refused event stream is followed by POST, never by GET
    assert_eq!(backend.log(), vec!["eventsource", "post-fetch", "similarity"]);
}

#[tokio::test]
async fn test_chunked_get_reads_raw_text_until_eof() {
    let (backend, origin) = spawn_backend(Behaviour {
        post_stream: Reply::Status(axum::http::StatusCode::METHOD_NOT_ALLOWED),
        get_stream: Reply::plain(vec!["Hello\n", " wor", "ld"]),
        ..Behaviour::default()
    })
    .await;

    let mut recorder = Recorder::default();
    let message = controller(&origin)
        .ask("q", &mut recorder)
        .await
        .unwrap();

    assert_eq!(message.text, "Hello world");
    assert_eq!(message.transport, Some(TransportKind::GetFetch));
    assert_eq!(
        backend.log(),
        vec!["eventsource", "post-fetch", "get-fetch", "similarity"]
    );
}

#[tokio::test]
async fn test_all_transports_fail_then_single_fallback() {
    let (backend, origin) = spawn_backend(Behaviour {
        query: Reply::Json(json!({"question": "q", "answer": "X", "sources": []})),
        ..Behaviour::default()
    })
    .await;

    let mut recorder = Recorder::default();
    let mut chat = controller(&origin);
    let message = chat.ask("q", &mut recorder).await.unwrap();

    assert_eq!(message.text, "X");
    assert_eq!(message.transport, None);
    assert!(!message.is_error);
    assert_eq!(recorder.replaced, vec!["X"]);
    assert_eq!(
        backend.log(),
        vec!["eventsource", "post-fetch", "get-fetch", "query"]
    );
    assert_eq!(chat.state(), ControllerState::Completed);
}

#[tokio::test]
async fn test_fallback_overwrites_partial_stream() {
    let (backend, origin) = spawn_backend(Behaviour {
        // Closes without [DONE] after one token
        eventsource: Reply::sse(vec!["data: partial\n\n"]),
        query: Reply::Json(json!({
            "answer": "X",
            "sources": [{"title": "Guide", "content": "body", "score": 0.8, "metadata": {}}]
        })),
        ..Behaviour::default()
    })
    .await;

    let mut recorder = Recorder::default();
    let message = controller(&origin)
        .ask("q", &mut recorder)
        .await
        .unwrap();

    assert_eq!(recorder.snapshots, vec!["partial"]);
    assert_eq!(message.text, "X");
    assert_eq!(message.sources.len(), 1);
    assert_eq!(message.sources[0].title, "Guide");
    assert_eq!(
        backend
            .log()
            .iter()
            .filter(|entry| entry.as_str() == "query")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_stalled_stream_times_out_into_fallback() {
    let (backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::Stall {
            content_type: "text/event-stream",
            chunks: vec!["data: partial\n\n"],
        },
        query: Reply::Json(json!({"answer": "X"})),
        ..Behaviour::default()
    })
    .await;

    let mut recorder = Recorder::default();
    let mut chat = controller_with_budget(&origin, 2);
    let started = Instant::now();
    let message = chat.ask("q", &mut recorder).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(2), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "returned after {elapsed:?}");
    assert_eq!(recorder.snapshots, vec!["partial"]);
    assert_eq!(recorder.replaced, vec!["X"]);
    assert_eq!(message.text, "X");
    assert_eq!(message.transport, None);
    // Timeout ends streaming: no further transports, one fallback
    assert_eq!(backend.log(), vec!["eventsource", "query"]);
    assert_eq!(chat.state(), ControllerState::Completed);
}

#[tokio::test]
async fn test_broken_chunked_body_advances_to_next_transport() {
    let (backend, origin) = spawn_backend(Behaviour {
        post_stream: Reply::Broken {
            content_type: "text/event-stream",
            chunks: vec!["data: Hel\n"],
        },
        get_stream: Reply::plain(vec!["lo\n"]),
        ..Behaviour::default()
    })
    .await;

    let mut recorder = Recorder::default();
    let message = controller(&origin)
        .ask("q", &mut recorder)
        .await
        .unwrap();

    // Tokens from the failed attempt stay applied
    assert_eq!(recorder.tokens, vec!["Hel", "lo"]);
    assert_eq!(message.text, "Hello");
    assert_eq!(message.transport, Some(TransportKind::GetFetch));
    assert_eq!(
        backend.log(),
        vec!["eventsource", "post-fetch", "get-fetch", "similarity"]
    );
}

#[tokio::test]
async fn test_token_and_sources_in_one_frame() {
    let (backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::sse(vec![
            "data: {\"token\":\"Hi\",\"sources\":[{\"title\":\"Doc\",\"score\":0.6}]}\n\n",
            "data: [DONE]\n\n",
        ]),
        ..Behaviour::default()
    })
    .await;

    let message = controller(&origin)
        .ask("q", &mut Recorder::default())
        .await
        .unwrap();

    assert_eq!(message.text, "Hi");
    assert_eq!(message.sources.len(), 1);
    assert_eq!(message.sources[0].title, "Doc");
    assert_eq!(backend.log(), vec!["eventsource"]);
}

#[tokio::test]
async fn test_backend_error_frame_skips_remaining_transports() {
    let (backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::sse(vec!["data: {\"error\":\"index not ready\"}\n\n"]),
        post_stream: Reply::sse(vec!["data: never\n", "data: [DONE]\n"]),
        query: Reply::Json(json!({"answer": "from fallback"})),
        ..Behaviour::default()
    })
    .await;

    let message = controller(&origin)
        .ask("q", &mut Recorder::default())
        .await
        .unwrap();

    assert_eq!(message.text, "from fallback");
    assert_eq!(backend.log(), vec!["eventsource", "query"]);
}

#[tokio::test]
async fn test_fallback_failure_yields_error_message() {
    let (backend, origin) = spawn_backend(Behaviour::default()).await;

    let mut recorder = Recorder::default();
    let mut chat = controller(&origin);
    let message = chat.ask("q", &mut recorder).await.unwrap();

    assert!(message.is_error);
    assert!(message.text.starts_with(FAILURE_PREFIX));
    assert!(message.text.contains("503"));
    assert_eq!(recorder.errors, vec![message.text.clone()]);
    assert_eq!(chat.state(), ControllerState::Completed);
    assert_eq!(backend.log().last().map(String::as_str), Some("query"));
}

#[tokio::test]
async fn test_json_body_short_circuits_stream() {
    let (backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::Json(json!({
            "answer": "Whole answer",
            "sources": [{"title": "Doc", "content": "c", "score": 0.5}]
        })),
        ..Behaviour::default()
    })
    .await;

    let mut recorder = Recorder::default();
    let message = controller(&origin)
        .ask("q", &mut recorder)
        .await
        .unwrap();

    assert_eq!(message.text, "Whole answer");
    assert_eq!(message.transport, Some(TransportKind::EventSource));
    assert_eq!(recorder.tokens, vec!["Whole answer"]);
    assert_eq!(message.sources.len(), 1);
    // Sources came with the body, so no similarity lookup
    assert_eq!(backend.log(), vec!["eventsource"]);
}

#[tokio::test]
async fn test_sources_fetched_after_stream() {
    let (_backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::sse(vec!["data: {\"text\":\"ok\"}\n\n", "data: [DONE]\n\n"]),
        similarity: Reply::Json(json!({
            "query": "q",
            "results": [
                {"title": "A", "content": "first", "score": 0.9, "metadata": {"source": "a.pdf", "page": 3}},
                {"title": "B", "content": "second", "score": 0.4}
            ]
        })),
        ..Behaviour::default()
    })
    .await;

    let message = controller(&origin)
        .ask("q", &mut Recorder::default())
        .await
        .unwrap();

    assert_eq!(message.text, "ok");
    assert_eq!(message.sources.len(), 2);
    assert_eq!(message.sources[0].label(), "a.pdf");
    assert_eq!(message.sources[0].metadata["page"], "3");
}

#[tokio::test]
async fn test_source_lookup_failure_is_silent() {
    let (_backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::sse(vec!["data: fine\n\n", "data: [DONE]\n\n"]),
        similarity: Reply::Status(axum::http::StatusCode::INTERNAL_SERVER_ERROR),
        ..Behaviour::default()
    })
    .await;

    let message = controller(&origin)
        .ask("q", &mut Recorder::default())
        .await
        .unwrap();

    assert_eq!(message.text, "fine");
    assert!(!message.is_error);
    assert!(message.sources.is_empty());
}

#[tokio::test]
async fn test_sources_disabled_skips_lookup() {
    let (backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::sse(vec!["data: fine\n\n", "data: [DONE]\n\n"]),
        ..Behaviour::default()
    })
    .await;

    let mut chat = controller(&origin);
    chat.set_return_sources(false);
    chat.ask("q", &mut Recorder::default()).await.unwrap();

    assert_eq!(backend.log(), vec!["eventsource"]);
}

#[tokio::test]
async fn test_blank_question_sends_nothing() {
    let (backend, origin) = spawn_backend(Behaviour::default()).await;

    let mut chat = controller(&origin);
    let result = chat.ask("   ", &mut Recorder::default()).await;

    assert!(matches!(result, Err(ChatError::EmptyQuestion)));
    assert!(backend.log().is_empty());
    assert_eq!(chat.state(), ControllerState::Idle);
}

#[tokio::test]
async fn test_reasoning_hidden_from_final_text() {
    let (_backend, origin) = spawn_backend(Behaviour {
        eventsource: Reply::sse(vec![
            "data: <think>weighing sources\n\n",
            "data: </think>\n\n",
            "data: Final\n\n",
            "data: [DONE]\n\n",
        ]),
        ..Behaviour::default()
    })
    .await;

    let message = controller(&origin)
        .ask("q", &mut Recorder::default())
        .await
        .unwrap();

    assert_eq!(message.text, "Final");
}
