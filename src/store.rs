//! SQLite-backed vector store with two collections.
//!
//! `courses` holds one row per course (the catalog): metadata plus an
//! embedding of the title, instructor, and lesson titles, used for fuzzy
//! course-name resolution.
//! `chunks` holds the content chunks with their embeddings. Similarity is
//! cosine, computed in Rust over the fetched BLOBs; the corpus is small
//! enough that a full scan beats maintaining an ANN index.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::models::{Course, CourseChunk, Lesson};

/// Provenance for one search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMetadata {
    pub course_title: String,
    pub lesson_number: Option<i64>,
    pub chunk_index: i64,
}

/// Outcome of a content search. `error` carries user-facing failures
/// (unresolvable course name) so the search tool can surface them as text
/// instead of aborting the query.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub documents: Vec<String>,
    pub metadata: Vec<ChunkMetadata>,
    /// `1.0 - cosine_similarity`, parallel to `documents`.
    pub distances: Vec<f32>,
    pub error: Option<String>,
}

impl SearchResults {
    pub fn empty_with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Dual-collection vector store over a SQLite pool.
#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    max_results: usize,
    min_confidence: Option<f32>,
}

impl VectorStore {
    /// Open the store over an existing pool, creating tables as needed.
    pub async fn open(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        max_results: usize,
        min_confidence: Option<f32>,
    ) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS courses (
                title TEXT PRIMARY KEY,
                course_link TEXT,
                instructor TEXT,
                lessons_json TEXT NOT NULL DEFAULT '[]',
                embedding BLOB NOT NULL,
                embedding_model TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                course_title TEXT NOT NULL,
                lesson_number INTEGER,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                FOREIGN KEY (course_title) REFERENCES courses(title)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_course ON chunks(course_title)")
            .execute(&pool)
            .await?;

        Ok(Self {
            pool,
            embedder,
            max_results,
            min_confidence,
        })
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Upsert a course's catalog entry. Fuzzy name resolution matches
    /// against an embedding of the title plus instructor and lesson titles,
    /// so "the course X teaches about Y" resolves even when neither X nor Y
    /// appears in the title.
    pub async fn add_course_metadata(&self, course: &Course) -> Result<()> {
        let embedding = self.embedder.embed_one(&catalog_text(course)).await?;
        let lessons_json =
            serde_json::to_string(&course.lessons).context("Failed to serialize lessons")?;

        sqlx::query(
            r#"
            INSERT INTO courses (title, course_link, instructor, lessons_json, embedding, embedding_model, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(title) DO UPDATE SET
                course_link = excluded.course_link,
                instructor = excluded.instructor,
                lessons_json = excluded.lessons_json,
                embedding = excluded.embedding,
                embedding_model = excluded.embedding_model,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&course.title)
        .bind(&course.course_link)
        .bind(&course.instructor)
        .bind(&lessons_json)
        .bind(vec_to_blob(&embedding))
        .bind(self.embedder.model_name())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Embed and upsert content chunks. The record id is
    /// `"{course_title}-{chunk_index}"`, so re-ingesting the same document
    /// overwrites rather than duplicates.
    pub async fn add_course_content(&self, chunks: &[CourseChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        anyhow::ensure!(
            embeddings.len() == chunks.len(),
            "Embedder returned {} vectors for {} chunks",
            embeddings.len(),
            chunks.len()
        );

        // One transaction per batch: a failure mid-batch must not leave a
        // course half-updated.
        let mut tx = self.pool.begin().await?;
        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            let id = format!("{}-{}", chunk.course_title, chunk.chunk_index);
            sqlx::query(
                r#"
                INSERT INTO chunks (id, course_title, lesson_number, chunk_index, content, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    course_title = excluded.course_title,
                    lesson_number = excluded.lesson_number,
                    chunk_index = excluded.chunk_index,
                    content = excluded.content,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&id)
            .bind(&chunk.course_title)
            .bind(chunk.lesson_number)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(vec_to_blob(embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Resolve a partial or fuzzy course name to an exact catalog title via
    /// embedding similarity. Returns `None` when the catalog is empty or the
    /// best match falls below the configured confidence floor.
    pub async fn resolve_course_name(&self, name: &str) -> Result<Option<String>> {
        let query_vec = self.embedder.embed_one(name).await?;

        let rows = sqlx::query("SELECT title, embedding FROM courses")
            .fetch_all(&self.pool)
            .await?;

        let mut best: Option<(String, f32)> = None;
        for row in rows {
            let title: String = row.get("title");
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(&query_vec, &blob_to_vec(&blob));
            if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                best = Some((title, score));
            }
        }

        Ok(match best {
            Some((title, score)) => {
                if self.min_confidence.map(|floor| score < floor).unwrap_or(false) {
                    None
                } else {
                    Some(title)
                }
            }
            None => None,
        })
    }

    /// Semantic search over content chunks with optional course and lesson
    /// filters. An unresolvable course name is reported in the result's
    /// `error` field, not as an `Err`.
    pub async fn search(
        &self,
        query: &str,
        course_name: Option<&str>,
        lesson_number: Option<i64>,
        limit: Option<usize>,
    ) -> Result<SearchResults> {
        let course_title = match course_name {
            Some(name) => match self.resolve_course_name(name).await? {
                Some(title) => Some(title),
                None => {
                    return Ok(SearchResults::empty_with_error(format!(
                        "No course found matching '{}'",
                        name
                    )));
                }
            },
            None => None,
        };

        let query_vec = self.embedder.embed_one(query).await?;

        let mut sql = String::from(
            "SELECT content, course_title, lesson_number, chunk_index, embedding FROM chunks",
        );
        let mut clauses: Vec<&str> = Vec::new();
        if course_title.is_some() {
            clauses.push("course_title = ?");
        }
        if lesson_number.is_some() {
            clauses.push("lesson_number = ?");
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut q = sqlx::query(&sql);
        if let Some(title) = &course_title {
            q = q.bind(title);
        }
        if let Some(lesson) = lesson_number {
            q = q.bind(lesson);
        }

        let rows = q.fetch_all(&self.pool).await?;

        let mut scored: Vec<(f32, String, ChunkMetadata)> = rows
            .into_iter()
            .map(|row| {
                let content: String = row.get("content");
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(&query_vec, &blob_to_vec(&blob));
                let meta = ChunkMetadata {
                    course_title: row.get("course_title"),
                    lesson_number: row.get("lesson_number"),
                    chunk_index: row.get("chunk_index"),
                };
                (score, content, meta)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.unwrap_or(self.max_results));

        let mut results = SearchResults::default();
        for (score, content, meta) in scored {
            results.documents.push(content);
            results.metadata.push(meta);
            results.distances.push(1.0 - score);
        }
        Ok(results)
    }

    /// Titles of all indexed courses, sorted for stable output.
    pub async fn course_titles(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT title FROM courses ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("title")).collect())
    }

    pub async fn course_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM courses")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Course link for an exact catalog title.
    pub async fn course_link(&self, title: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT course_link FROM courses WHERE title = ?")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get("course_link")))
    }

    /// Lesson link for an exact catalog title and lesson number.
    pub async fn lesson_link(&self, title: &str, lesson_number: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT lessons_json FROM courses WHERE title = ?")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let lessons_json: String = row.get("lessons_json");
        let lessons: Vec<Lesson> =
            serde_json::from_str(&lessons_json).context("Corrupt lessons_json in catalog")?;

        Ok(lessons
            .into_iter()
            .find(|l| l.lesson_number == lesson_number)
            .and_then(|l| l.lesson_link))
    }

    /// Drop all indexed data from both collections.
    pub async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        sqlx::query("DELETE FROM courses").execute(&self.pool).await?;
        Ok(())
    }
}

/// Text embedded for a catalog entry: title, instructor, and lesson titles.
fn catalog_text(course: &Course) -> String {
    let mut text = course.title.clone();
    if let Some(instructor) = &course.instructor {
        text.push(' ');
        text.push_str(instructor);
    }
    for lesson in &course.lessons {
        text.push(' ');
        text.push_str(&lesson.title);
    }
    text
}
