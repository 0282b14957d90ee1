//! Query and ingestion orchestration.
//!
//! [`RagSystem`] wires the vector store, tool registry, generator, and
//! session manager together. The query path resolves history, runs the
//! generator's tool loop, drains retrieval sources, and records the exchange
//! only after generation succeeds, so a failed query never pollutes a
//! session.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::extract;
use crate::generator::{AnthropicClient, Generator, LlmClient};
use crate::models::{Course, Source};
use crate::processor::{process_document, ProcessError};
use crate::session::SessionManager;
use crate::store::VectorStore;
use crate::tools::{CourseSearchTool, ToolRegistry};

/// Result of one answered query.
#[derive(Debug)]
pub struct QueryOutcome {
    pub answer: String,
    pub sources: Vec<Source>,
    pub session_id: String,
}

/// Summary of a folder ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub courses_added: usize,
    pub chunks_added: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Counts exposed by the courses endpoint and CLI.
#[derive(Debug, serde::Serialize)]
pub struct CourseAnalytics {
    pub total_courses: i64,
    pub course_titles: Vec<String>,
}

pub struct RagSystem {
    store: VectorStore,
    generator: Generator,
    registry: ToolRegistry,
    sessions: SessionManager,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RagSystem {
    /// Build the full system from configuration: SQLite pool, configured
    /// embedder, Anthropic client.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        let embedder = create_embedder(&config.embedding)?;
        let store = VectorStore::open(
            pool,
            embedder,
            config.retrieval.max_results,
            config.retrieval.min_confidence,
        )
        .await?;
        let client: Arc<dyn LlmClient> = Arc::new(AnthropicClient::new(&config.generation)?);

        Ok(Self::assemble(
            store,
            client,
            config.generation.max_tool_rounds,
            config.session.max_history,
            config.chunking.chunk_size,
            config.chunking.chunk_overlap,
        ))
    }

    /// Build from pre-constructed parts. Tests inject a deterministic
    /// embedder (via the store) and a scripted client here.
    pub fn assemble(
        store: VectorStore,
        client: Arc<dyn LlmClient>,
        max_tool_rounds: usize,
        max_history: usize,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CourseSearchTool::new(store.clone())));

        Self {
            store,
            generator: Generator::new(client, max_tool_rounds),
            registry,
            sessions: SessionManager::new(max_history),
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Answer a question, creating a session when none is supplied.
    pub async fn query(&self, question: &str, session_id: Option<&str>) -> Result<QueryOutcome> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => self.sessions.create_session(),
        };
        let history = self.sessions.history(&session_id);

        let result = self
            .generator
            .generate(question, history.as_deref(), Some(&self.registry))
            .await;
        // Drain even on failure: sources recorded by a tool round that never
        // produced an answer must not leak into the next query.
        let sources = self.registry.take_sources();
        let answer = result?;

        self.sessions.add_exchange(&session_id, question, &answer);

        Ok(QueryOutcome {
            answer,
            sources,
            session_id,
        })
    }

    /// Parse and index a single course document.
    pub async fn ingest_document(&self, path: &Path) -> Result<(Course, usize)> {
        ingest_document(&self.store, path, self.chunk_size, self.chunk_overlap).await
    }

    /// Index every supported file in `dir`. See [`ingest_folder`].
    pub async fn ingest_folder(&self, dir: &Path, clear: bool) -> Result<IngestReport> {
        ingest_folder(&self.store, dir, self.chunk_size, self.chunk_overlap, clear).await
    }

    pub async fn analytics(&self) -> Result<CourseAnalytics> {
        analytics(&self.store).await
    }
}

/// Parse and index a single course document.
pub async fn ingest_document(
    store: &VectorStore,
    path: &Path,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<(Course, usize)> {
    let raw = extract::extract_file(path)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    let (course, chunks) = process_document(&raw, chunk_size, chunk_overlap)
        .map_err(|e: ProcessError| anyhow::anyhow!("{}: {}", path.display(), e))?;

    store.add_course_metadata(&course).await?;
    store.add_course_content(&chunks).await?;

    Ok((course, chunks.len()))
}

/// Index every supported file in `dir` (non-recursive). Already-indexed
/// course titles are skipped; individual file failures are reported and do
/// not abort the run.
pub async fn ingest_folder(
    store: &VectorStore,
    dir: &Path,
    chunk_size: usize,
    chunk_overlap: usize,
    clear: bool,
) -> Result<IngestReport> {
    if clear {
        store.clear_all().await?;
    }

    let existing: HashSet<String> = store.course_titles().await?.into_iter().collect();
    let mut report = IngestReport::default();

    let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| extract::is_supported(p))
        .collect();
    paths.sort();

    for path in paths {
        let raw = match extract::extract_file(&path) {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("Warning: skipping {}: {}", path.display(), e);
                report.failed += 1;
                continue;
            }
        };

        let (course, chunks) = match process_document(&raw, chunk_size, chunk_overlap) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("Warning: skipping {}: {}", path.display(), e);
                report.failed += 1;
                continue;
            }
        };

        if existing.contains(&course.title) {
            report.skipped += 1;
            continue;
        }

        store
            .add_course_metadata(&course)
            .await
            .with_context(|| format!("Failed to index catalog entry for {}", course.title))?;
        store
            .add_course_content(&chunks)
            .await
            .with_context(|| format!("Failed to index content for {}", course.title))?;

        report.courses_added += 1;
        report.chunks_added += chunks.len();
    }

    Ok(report)
}

pub async fn analytics(store: &VectorStore) -> Result<CourseAnalytics> {
    Ok(CourseAnalytics {
        total_courses: store.course_count().await?,
        course_titles: store.course_titles().await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::generator::{ModelReply, ModelRequest, ToolCall};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

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

    struct ScriptedClient {
        replies: Mutex<VecDeque<ModelReply>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, _request: &ModelRequest) -> Result<ModelReply> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("Scripted client ran out of replies"))
        }
    }

    async fn system(replies: Vec<ModelReply>) -> RagSystem {
        let pool = db::connect_in_memory().await.unwrap();
        let store = VectorStore::open(pool, Arc::new(StubEmbedder), 5, None)
            .await
            .unwrap();
        let client = Arc::new(ScriptedClient {
            replies: Mutex::new(replies.into()),
        });
        RagSystem::assemble(store, client, 1, 2, 800, 100)
    }

    #[tokio::test]
    async fn query_without_session_creates_one() {
        let rag = system(vec![ModelReply::Text("answer".to_string())]).await;
        let outcome = rag.query("question", None).await.unwrap();
        assert_eq!(outcome.session_id, "session_1");
        assert_eq!(outcome.answer, "answer");
        assert!(outcome.sources.is_empty());
    }

    #[tokio::test]
    async fn exchange_recorded_only_after_success() {
        let rag = system(vec![ModelReply::Text("first".to_string())]).await;
        let id = rag.sessions().create_session();

        rag.query("q1", Some(&id)).await.unwrap();
        assert!(rag.sessions().history(&id).unwrap().contains("q1"));

        // Script exhausted: the next query fails and must not touch history.
        assert!(rag.query("q2", Some(&id)).await.is_err());
        let history = rag.sessions().history(&id).unwrap();
        assert!(history.contains("q1"));
        assert!(!history.contains("q2"));
    }

    #[tokio::test]
    async fn failed_tool_query_does_not_leak_sources() {
        let pool = db::connect_in_memory().await.unwrap();
        let store = VectorStore::open(pool, Arc::new(StubEmbedder), 5, None)
            .await
            .unwrap();
        let client = Arc::new(ScriptedClient {
            replies: Mutex::new(VecDeque::from(vec![ModelReply::ToolUse {
                text: None,
                calls: vec![ToolCall {
                    id: "toolu_1".to_string(),
                    name: "search_course_content".to_string(),
                    input: serde_json::json!({ "query": "alpha content" }),
                }],
            }])),
        });
        let rag = RagSystem::assemble(store, client.clone(), 1, 2, 800, 100);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("course.txt"),
            "Course Title: Alpha Course\n\nLesson 1: Start\nAlpha content here. More alpha text.\n",
        )
        .unwrap();
        rag.ingest_folder(dir.path(), false).await.unwrap();

        // The search runs, then the follow-up model call fails (script
        // exhausted), so the first query errors after recording sources.
        assert!(rag.query("q1", None).await.is_err());

        // A later query that performs no search must come back source-free.
        client
            .replies
            .lock()
            .unwrap()
            .push_back(ModelReply::Text("plain answer".to_string()));
        let outcome = rag.query("q2", None).await.unwrap();
        assert_eq!(outcome.answer, "plain answer");
        assert!(outcome.sources.is_empty());
    }

    #[tokio::test]
    async fn ingest_folder_indexes_and_skips_duplicates() {
        let rag = system(vec![]).await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("course1.txt"),
            "Course Title: Alpha Course\n\nLesson 1: Start\nAlpha content here. More alpha text.\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let report = rag.ingest_folder(dir.path(), false).await.unwrap();
        assert_eq!(report.courses_added, 1);
        assert!(report.chunks_added >= 1);
        assert_eq!(report.failed, 0);

        // Second run: same title, nothing re-indexed.
        let again = rag.ingest_folder(dir.path(), false).await.unwrap();
        assert_eq!(again.courses_added, 0);
        assert_eq!(again.skipped, 1);

        let analytics = rag.analytics().await.unwrap();
        assert_eq!(analytics.total_courses, 1);
        assert_eq!(analytics.course_titles, vec!["Alpha Course".to_string()]);
    }

    #[tokio::test]
    async fn malformed_file_is_reported_not_fatal() {
        let rag = system(vec![]).await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.txt"), "no title header at all\n").unwrap();
        std::fs::write(
            dir.path().join("good.txt"),
            "Course Title: Good Course\n\nSome content here.\n",
        )
        .unwrap();

        let report = rag.ingest_folder(dir.path(), false).await.unwrap();
        assert_eq!(report.courses_added, 1);
        assert_eq!(report.failed, 1);
    }
}
