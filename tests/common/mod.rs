// Shared helpers for the mock-server integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_chat::chat::cache::ManualClock;
use agent_chat::{BotConfig, BotManager, ChatController, ChatEvent, ChatSettings, Message};
use axum::Router;
use serde_json::Value;
use tokio::sync::broadcast;

pub const T0: i64 = 1_700_000_000_000;

/// Request bodies (or query maps) seen by a mock route.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Value>>>);

impl Recorder {
    pub fn push(&self, v: Value) {
        self.0.lock().unwrap().push(v);
    }

    pub fn all(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Serve `router` on an ephemeral loopback port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Render JSON payloads as an SSE body.
pub fn sse_body(frames: &[Value]) -> String {
    frames
        .iter()
        .map(|f| format!("data: {}\n\n", f))
        .collect()
}

pub fn controller(config: BotConfig, settings: ChatSettings) -> (Arc<ChatController>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let bots = Arc::new(BotManager::new());
    assert!(bots.initialize_bot(config));
    let chat = ChatController::with_clock(bots, settings, clock.clone());
    (Arc::new(chat), clock)
}

/// Wait for a message update matching `pred`.
pub async fn wait_for_update(
    rx: &mut broadcast::Receiver<ChatEvent>,
    pred: impl Fn(&Message) -> bool,
) -> Message {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ChatEvent::MessageUpdated { message, .. }) if pred(&message) => return message,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("message update within 5s")
}
