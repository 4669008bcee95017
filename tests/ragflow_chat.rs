// End-to-end chat flows against a mock RAGFlow server.

mod common;

use std::collections::HashMap;

use agent_chat::bots::RagflowConfig;
use agent_chat::chat::SendStatus;
use agent_chat::{BotConfig, ChatEvent, ChatSettings, Role};
use axum::extract::Query;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{controller, serve, Recorder};
use serde_json::{json, Value};

const AGENT: &str = "agent-7";

fn ragflow_config(base: &str) -> BotConfig {
    BotConfig::Ragflow(RagflowConfig {
        // suffix is stripped by the client
        base_url: format!("{}/api/v1", base),
        api_key: "rag-key".into(),
        agent_id: AGENT.into(),
        user_id: "user-1".into(),
        backend_url: None,
        local_agent_id: None,
    })
}

struct Mock {
    base: String,
    sessions_created: Recorder,
    completions: Recorder,
    list_queries: Recorder,
}

async fn mock(completion: Value) -> Mock {
    let sessions_created = Recorder::default();
    let completions = Recorder::default();
    let list_queries = Recorder::default();
    let (sc, cp, lq) = (sessions_created.clone(), completions.clone(), list_queries.clone());
    let sessions_path = format!("/api/v1/chats/{}/sessions", AGENT);
    let router = Router::new()
        .route(
            &sessions_path,
            post(move |Json(body): Json<Value>| {
                let sc = sc.clone();
                async move {
                    sc.push(body);
                    Json(json!({"code": 0, "data": {"id": "s1", "name": "first"}}))
                }
            })
            .get(move |Query(q): Query<HashMap<String, String>>| {
                let lq = lq.clone();
                async move {
                    if let Some(id) = q.get("id") {
                        return Json(json!({"code": 0, "data": [{
                            "id": id,
                            "messages": [
                                {"role": "user", "content": "what is rust?"},
                                {"role": "assistant", "content": "A language.",
                                 "reference": {"total": 1, "chunks": [{"id": "k1", "content_with_weight": "Rust is...", "doc_id": "d1", "docnm_kwd": "rust.pdf"}]}}
                            ]
                        }]}));
                    }
                    lq.push(json!(q));
                    let page: u32 = q.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
                    let data: Vec<Value> = match page {
                        1 => vec![
                            json!({"id": "s1", "name": "Rust", "create_time": 1_700_000_000_000i64}),
                            json!({"id": "s2", "name": "Go", "create_date": "2024-01-02 10:00:00"}),
                        ],
                        _ => vec![json!({"id": "s3", "name": "Zig"})],
                    };
                    Json(json!({"code": 0, "data": data}))
                }
            }),
        )
        .route(
            &format!("/api/v1/chats/{}/completions", AGENT),
            post(move |Json(body): Json<Value>| {
                let cp = cp.clone();
                let completion = completion.clone();
                async move {
                    cp.push(body);
                    Json(completion)
                }
            }),
        );
    Mock {
        base: serve(router).await,
        sessions_created,
        completions,
        list_queries,
    }
}

fn answer_with_reference() -> Value {
    json!({
        "code": 0,
        "data": {
            "answer": "Rust is a systems language.",
            "session_id": "s1",
            "reference": {
                "total": 1,
                "chunks": [{"id": "k1", "content": "Rust is...", "document_id": "d1",
                            "document_name": "rust.pdf", "similarity": 0.91, "image_id": "img-1"}],
                "doc_aggs": [{"doc_id": "d1", "doc_name": "rust.pdf", "count": 1}]
            }
        }
    })
}

#[tokio::test]
async fn test_thinking_then_answer_with_reference() {
    let mock = mock(answer_with_reference()).await;
    let (chat, clock) = controller(ragflow_config(&mock.base), ChatSettings::default());
    let session = chat.create_session();
    let mut events = chat.subscribe();

    let report = chat.send_message("What is Rust?").await.unwrap();
    assert_eq!(report.status, SendStatus::Completed);

    let updates: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| match e {
            ChatEvent::MessageUpdated { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(updates[0].thinking.as_deref(), Some("Thinking..."));
    assert_eq!(updates[0].content, "");

    let current = chat.session(&session).unwrap();
    assert_eq!(current.conversation_id.as_deref(), Some("s1"));
    assert_eq!(current.title, "What is Rust?");
    let reply = current.messages.last().unwrap();
    assert_eq!(reply.content, "Rust is a systems language.");
    assert!(reply.thinking.is_none());
    assert!(!reply.is_streaming);
    let reference = reply.reference.as_ref().unwrap();
    assert_eq!(reference.chunks["k1"].document_name, "rust.pdf");
    assert_eq!(reference.chunks["k1"].img_id.as_deref(), Some("img-1"));
    assert_eq!(reference.doc_aggs["d1"].count, 1);

    clock.advance(1_000);
    chat.send_message("And ownership?").await.unwrap();
    assert_eq!(mock.sessions_created.count(), 1, "session is reused");
    assert_eq!(mock.sessions_created.all()[0]["name"], "What is Rust?");
    let sent = mock.completions.all();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1]["session_id"], "s1");
    assert_eq!(sent[1]["stream"], false);
    assert_eq!(sent[1]["question"], "And ownership?");
}

#[tokio::test]
async fn test_structured_answer_is_normalized() {
    let mock = mock(json!({
        "code": 0,
        "data": {"answer": {"content": [{"text": "Part one."}, {"text": "Part two."}]}, "session_id": "s1"}
    }))
    .await;
    let (chat, _) = controller(ragflow_config(&mock.base), ChatSettings::default());
    chat.create_session();

    chat.send_message("summarize").await.unwrap();
    let reply = chat.current_session().unwrap().messages.pop().unwrap();
    assert!(reply.content.contains("Part one."));
    assert!(reply.content.contains("Part two."));
    assert!(!reply.content.contains("[object Object]"));
}

#[tokio::test]
async fn test_backend_error_code_is_user_facing() {
    let mock = mock(json!({"code": 102, "message": "Agent not found"})).await;
    let (chat, _) = controller(ragflow_config(&mock.base), ChatSettings::default());
    chat.create_session();

    let report = chat.send_message("hello").await.unwrap();
    assert_eq!(report.status, SendStatus::Failed("Agent not found".into()));
    let reply = chat.current_session().unwrap().messages.pop().unwrap();
    assert!(reply.has_error);
    assert!(reply.thinking.is_none());
    assert!(!reply.is_streaming);
    assert!(reply.content.starts_with("❌ Error while processing: Agent not found"));
}

#[tokio::test]
async fn test_history_pages_by_number() {
    let mock = mock(answer_with_reference()).await;
    let settings = ChatSettings {
        history_page_size: 2,
        ..ChatSettings::default()
    };
    let (chat, _) = controller(ragflow_config(&mock.base), settings);

    let first = chat.fetch_history_conversations(false, false).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].created_at, Some(1_700_000_000_000));
    assert!(first[1].created_at.unwrap() > 1_700_000_000_000);
    assert!(chat.has_more_history(), "a full page implies more");

    let all = chat.fetch_history_conversations(false, true).await.unwrap();
    let ids: Vec<_> = all.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2", "s3"]);
    assert!(!chat.has_more_history());

    let queries = mock.list_queries.all();
    assert_eq!(queries[0]["page"], "1");
    assert_eq!(queries[1]["page"], "2");
    assert_eq!(queries[1]["page_size"], "2");
}

#[tokio::test]
async fn test_load_history_session_messages() {
    let mock = mock(answer_with_reference()).await;
    let (chat, _) = controller(ragflow_config(&mock.base), ChatSettings::default());
    let list = chat.fetch_history_conversations(false, false).await.unwrap();

    chat.load_history_conversation(&list[0]).await.unwrap();
    let session = chat.current_session().unwrap();
    assert!(session.is_history);
    assert_eq!(session.title, "Rust");
    let roles: Vec<_> = session.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(session.messages[1].content, "A language.");
    let reference = session.messages[1].reference.as_ref().unwrap();
    assert_eq!(reference.chunks["k1"].content, "Rust is...");
    assert_eq!(reference.chunks["k1"].document_name, "rust.pdf");
}

#[tokio::test]
async fn test_uploads_are_rejected_per_file() {
    let mock = mock(answer_with_reference()).await;
    let (chat, _) = controller(ragflow_config(&mock.base), ChatSettings::default());
    let results = chat
        .upload_files(vec![agent_chat::bots::UploadFile {
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            data: b"hello".to_vec(),
        }])
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
    assert!(chat.staged_attachments().is_empty());
}
