//! End-to-end pipeline tests: ingest documents from disk, then answer
//! queries through the full tool-use loop with a scripted model and a
//! deterministic embedder.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use lectern::db;
use lectern::embedding::Embedder;
use lectern::generator::{LlmClient, ModelReply, ModelRequest, ToolCall};
use lectern::rag::RagSystem;
use lectern::store::VectorStore;

// ============ Test doubles ============

/// Deterministic bag-of-words embedder; no network, stable across runs.
struct StubEmbedder;

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub-bag-of-words"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 64];
    for word in text.to_lowercase().split_whitespace() {
        let mut h: usize = 0;
        for b in word.bytes() {
            h = h.wrapping_mul(31).wrapping_add(b as usize);
        }
        v[h % 64] += 1.0;
    }
    v
}

/// Replays scripted replies and records every request.
struct ScriptedClient {
    replies: Mutex<VecDeque<ModelReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedClient {
    fn new(replies: Vec<ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("Scripted client ran out of replies"))
    }
}

fn search_call(id: &str, input: serde_json::Value) -> ModelReply {
    ModelReply::ToolUse {
        text: None,
        calls: vec![ToolCall {
            id: id.to_string(),
            name: "search_course_content".to_string(),
            input,
        }],
    }
}

// ============ Fixtures ============

const COURSE_DOC: &str = "Course Title: Building MCP Servers
Course Link: https://example.com/mcp
Course Instructor: Jordan Reyes

Lesson 0: Welcome
Lesson Link: https://example.com/mcp/0
This lesson welcomes students to the course. It explains the overall goals.

Lesson 1: Protocol Basics
Lesson Link: https://example.com/mcp/1
The protocol uses a client server architecture with typed messages. Servers expose tools and resources to clients.

Lesson 2: Advanced Topics
Sampling lets servers request completions from the client model. Notifications keep both sides in sync.
";

async fn store_with_docs(client: Arc<ScriptedClient>) -> (RagSystem, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mcp.txt"), COURSE_DOC).unwrap();

    let pool = db::connect_in_memory().await.unwrap();
    let store = VectorStore::open(pool, Arc::new(StubEmbedder), 5, None)
        .await
        .unwrap();
    let rag = RagSystem::assemble(store, client, 1, 2, 200, 50);

    let report = rag.ingest_folder(dir.path(), false).await.unwrap();
    assert_eq!(report.courses_added, 1);
    assert!(report.chunks_added >= 3);

    (rag, dir)
}

// ============ Ingestion ============

#[tokio::test]
async fn ingest_extracts_structure_and_is_idempotent() {
    let client = Arc::new(ScriptedClient::new(vec![]));
    let (rag, dir) = store_with_docs(client).await;

    let analytics = rag.analytics().await.unwrap();
    assert_eq!(analytics.total_courses, 1);
    assert_eq!(analytics.course_titles, vec!["Building MCP Servers".to_string()]);

    // Same folder again: nothing new, nothing duplicated.
    let again = rag.ingest_folder(dir.path(), false).await.unwrap();
    assert_eq!(again.courses_added, 0);
    assert_eq!(again.skipped, 1);
    assert_eq!(rag.analytics().await.unwrap().total_courses, 1);
}

#[tokio::test]
async fn clear_rebuilds_the_index() {
    let client = Arc::new(ScriptedClient::new(vec![]));
    let (rag, dir) = store_with_docs(client).await;

    let report = rag.ingest_folder(dir.path(), true).await.unwrap();
    assert_eq!(report.courses_added, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(rag.analytics().await.unwrap().total_courses, 1);
}

// ============ Retrieval through the tool loop ============

#[tokio::test]
async fn tool_round_searches_with_lesson_filter_and_attaches_sources() {
    let client = Arc::new(ScriptedClient::new(vec![
        search_call(
            "toolu_1",
            json!({
                "query": "protocol client server architecture",
                "course_name": "MCP",
                "lesson_number": 1
            }),
        ),
        ModelReply::Text("The protocol is client-server with typed messages.".to_string()),
    ]));
    let (rag, _dir) = store_with_docs(client.clone()).await;

    let outcome = rag
        .query("What architecture does the protocol use?", None)
        .await
        .unwrap();

    assert_eq!(outcome.answer, "The protocol is client-server with typed messages.");
    assert_eq!(outcome.session_id, "session_1");

    // Sources come from the retrieved lesson, with its link.
    assert!(!outcome.sources.is_empty());
    assert!(outcome.sources.iter().all(|s| s.label == "Building MCP Servers - Lesson 1"));
    assert_eq!(outcome.sources[0].link.as_deref(), Some("https://example.com/mcp/1"));

    // Exactly two model calls: one with tools, the follow-up without.
    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].tools.is_some());
    assert!(requests[1].tools.is_none());

    // The tool result fed back to the model carries the lesson header and
    // only lesson 1 content.
    let tool_result = requests[1].messages[2]["content"][0]["content"]
        .as_str()
        .unwrap();
    assert!(tool_result.contains("[Building MCP Servers - Lesson 1]"));
    assert!(!tool_result.contains("Sampling lets servers"));
}

#[tokio::test]
async fn sources_are_one_shot() {
    let client = Arc::new(ScriptedClient::new(vec![
        search_call("toolu_1", json!({ "query": "typed messages" })),
        ModelReply::Text("First answer.".to_string()),
        ModelReply::Text("Second answer, no search.".to_string()),
    ]));
    let (rag, _dir) = store_with_docs(client).await;

    let first = rag.query("q1", None).await.unwrap();
    assert!(!first.sources.is_empty());

    // The next query runs no tool, so it must not inherit the old sources.
    let second = rag.query("q2", None).await.unwrap();
    assert!(second.sources.is_empty());
}

#[tokio::test]
async fn unknown_course_flows_back_as_tool_output() {
    let client = Arc::new(ScriptedClient::new(vec![
        search_call(
            "toolu_1",
            json!({ "query": "anything", "course_name": "Quantum Basket Weaving" }),
        ),
        ModelReply::Text("I could not find that course.".to_string()),
    ]));
    let (rag, _dir) = store_with_docs(client.clone()).await;

    let outcome = rag.query("Tell me about basket weaving", None).await.unwrap();
    assert_eq!(outcome.answer, "I could not find that course.");
    assert!(outcome.sources.is_empty());

    let requests = client.requests();
    let tool_result = requests[1].messages[2]["content"][0]["content"]
        .as_str()
        .unwrap();
    assert_eq!(tool_result, "No course found matching 'Quantum Basket Weaving'");
}

#[tokio::test]
async fn empty_index_reports_no_content_found() {
    let client = Arc::new(ScriptedClient::new(vec![
        search_call("toolu_1", json!({ "query": "anything at all" })),
        ModelReply::Text("Nothing indexed yet.".to_string()),
    ]));

    let pool = db::connect_in_memory().await.unwrap();
    let store = VectorStore::open(pool, Arc::new(StubEmbedder), 5, None)
        .await
        .unwrap();
    let rag = RagSystem::assemble(store, client.clone(), 1, 2, 200, 50);

    rag.query("anything?", None).await.unwrap();

    let requests = client.requests();
    let tool_result = requests[1].messages[2]["content"][0]["content"]
        .as_str()
        .unwrap();
    assert_eq!(tool_result, "No relevant content found.");
}

// ============ Sessions across queries ============

#[tokio::test]
async fn history_is_bounded_to_the_newest_exchanges() {
    let client = Arc::new(ScriptedClient::new(vec![
        ModelReply::Text("a1".to_string()),
        ModelReply::Text("a2".to_string()),
        ModelReply::Text("a3".to_string()),
    ]));
    let (rag, _dir) = store_with_docs(client.clone()).await;

    let id = rag.query("q1", None).await.unwrap().session_id;
    rag.query("q2", Some(&id)).await.unwrap();
    rag.query("q3", Some(&id)).await.unwrap();

    let requests = client.requests();
    // Third request sees the two previous exchanges in the system prompt.
    let system = &requests[2].system;
    assert!(system.contains("Previous conversation:"));
    assert!(system.contains("User: q1"));
    assert!(system.contains("Assistant: a2"));

    // A fourth query would see q2/q3 only: the oldest exchange is evicted.
    let history = rag.sessions().history(&id).unwrap();
    assert!(!history.contains("q1"));
    assert!(history.contains("q2"));
    assert!(history.contains("q3"));
}

#[tokio::test]
async fn separate_sessions_do_not_share_history() {
    let client = Arc::new(ScriptedClient::new(vec![
        ModelReply::Text("a1".to_string()),
        ModelReply::Text("a2".to_string()),
    ]));
    let (rag, _dir) = store_with_docs(client.clone()).await;

    let first = rag.query("first question", None).await.unwrap();
    let second = rag.query("second question", None).await.unwrap();
    assert_ne!(first.session_id, second.session_id);

    // The second session's request must not carry the first session's turn.
    let requests = client.requests();
    assert!(!requests[1].system.contains("first question"));
}
