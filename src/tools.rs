//! Tool abstraction for model-driven retrieval.
//!
//! The generator never talks to the vector store directly. It sees a list of
//! tool definitions, and when the model requests one, [`ToolRegistry`]
//! dispatches by name. Tools return plain text (the model consumes it) and
//! record [`Source`]s on the side so the orchestrator can attach provenance
//! to the final answer.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

use crate::models::Source;
use crate::store::VectorStore;

/// A tool the model can invoke during generation.
///
/// # Lifecycle
///
/// 1. The tool is registered via [`ToolRegistry::register`].
/// 2. [`definition`](Tool::definition) is collected once per request for the
///    model's tool list.
/// 3. [`execute`](Tool::execute) runs each time the model requests the tool.
/// 4. [`take_sources`](Tool::take_sources) drains provenance recorded by the
///    most recent execution.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the model, e.g. `"search_course_content"`.
    fn name(&self) -> &str;

    /// Anthropic-style tool definition: `name`, `description`, and a JSON
    /// Schema under `input_schema`.
    fn definition(&self) -> Value;

    /// Execute with the model-supplied input. The returned string is fed back
    /// to the model as the tool result; user-facing retrieval failures
    /// (unknown course, no matches) are part of that string, not errors.
    async fn execute(&self, input: Value) -> Result<String>;

    /// Drain sources recorded by the last execution. Defaults to none for
    /// tools that do not retrieve content.
    fn take_sources(&self) -> Vec<Source> {
        Vec::new()
    }
}

/// Name-keyed tool dispatcher handed to the generator.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Tool definitions in registration order, for the model request.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Dispatch a tool call by name. An unknown name is reported as tool
    /// output so the model can recover, not as an `Err`.
    pub async fn execute(&self, name: &str, input: Value) -> Result<String> {
        match self.tools.iter().find(|t| t.name() == name) {
            Some(tool) => tool.execute(input).await,
            None => Ok(format!("Tool '{}' not found", name)),
        }
    }

    /// Drain sources from all tools, in registration order.
    pub fn take_sources(&self) -> Vec<Source> {
        self.tools.iter().flat_map(|t| t.take_sources()).collect()
    }
}

/// Semantic search over course content, with fuzzy course-name matching and
/// lesson filtering.
pub struct CourseSearchTool {
    store: VectorStore,
    last_sources: Mutex<Vec<Source>>,
}

impl CourseSearchTool {
    pub fn new(store: VectorStore) -> Self {
        Self {
            store,
            last_sources: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Tool for CourseSearchTool {
    fn name(&self) -> &str {
        "search_course_content"
    }

    fn definition(&self) -> Value {
        json!({
            "name": "search_course_content",
            "description": "Search course materials with smart course name matching and lesson filtering",
            "input_schema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to search for in the course content"
                    },
                    "course_name": {
                        "type": "string",
                        "description": "Course title (partial matches work, e.g. 'MCP', 'Introduction')"
                    },
                    "lesson_number": {
                        "type": "integer",
                        "description": "Specific lesson number to search within (e.g. 1, 2, 3)"
                    }
                },
                "required": ["query"]
            }
        })
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let query = input
            .get("query")
            .and_then(|q| q.as_str())
            .unwrap_or_default();
        let course_name = input.get("course_name").and_then(|c| c.as_str());
        let lesson_number = input.get("lesson_number").and_then(|l| l.as_i64());

        let results = self
            .store
            .search(query, course_name, lesson_number, None)
            .await?;

        if let Some(error) = results.error {
            return Ok(error);
        }

        if results.is_empty() {
            let mut msg = String::from("No relevant content found");
            if let Some(course) = course_name {
                msg.push_str(&format!(" in course '{}'", course));
            }
            if let Some(lesson) = lesson_number {
                msg.push_str(&format!(" in lesson {}", lesson));
            }
            msg.push('.');
            return Ok(msg);
        }

        let mut formatted = Vec::with_capacity(results.documents.len());
        let mut sources = Vec::with_capacity(results.documents.len());

        for (doc, meta) in results.documents.iter().zip(results.metadata.iter()) {
            let header = match meta.lesson_number {
                Some(n) => format!("{} - Lesson {}", meta.course_title, n),
                None => meta.course_title.clone(),
            };
            formatted.push(format!("[{}]\n{}", header, doc));

            let link = match meta.lesson_number {
                Some(n) => self.store.lesson_link(&meta.course_title, n).await?,
                None => self.store.course_link(&meta.course_title).await?,
            };
            sources.push(Source::new(header, link));
        }

        *self.last_sources.lock().unwrap() = sources;
        Ok(formatted.join("\n\n"))
    }

    fn take_sources(&self) -> Vec<Source> {
        std::mem::take(&mut self.last_sources.lock().unwrap())
    }
}
