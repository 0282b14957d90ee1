//! Core data models used throughout Lectern.
//!
//! These types represent the courses, lessons, and content chunks that flow
//! through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// A single lesson within a course. Owned by exactly one [`Course`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    /// Lesson number, unique within the course (not globally).
    pub lesson_number: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_link: Option<String>,
}

/// A parsed course document. The title is the primary key across both
/// vector collections; re-ingesting the same title overwrites, never
/// duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructor: Option<String>,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

/// A chunk of course text plus its provenance metadata. Chunks live in the
/// vector index independent of the `Course` value they were derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseChunk {
    pub content: String,
    pub course_title: String,
    /// `None` for course-level chunks (text before any lesson marker).
    pub lesson_number: Option<i64>,
    /// Document-global, monotonically increasing index.
    pub chunk_index: i64,
}

/// A provenance descriptor attached to an answer: which course/lesson the
/// content came from, with a link when one is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Display label, e.g. `"Intro to MCP - Lesson 1"`.
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Source {
    pub fn new(label: impl Into<String>, link: Option<String>) -> Self {
        Self {
            label: label.into(),
            link,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lesson_optional_link_defaults_to_none() {
        let lesson: Lesson =
            serde_json::from_str(r#"{"lesson_number":0,"title":"Overview"}"#).unwrap();
        assert_eq!(lesson.lesson_number, 0);
        assert!(lesson.lesson_link.is_none());
    }

    #[test]
    fn course_roundtrips_through_json() {
        let course = Course {
            title: "Test".to_string(),
            course_link: None,
            instructor: Some("Morgan".to_string()),
            lessons: vec![Lesson {
                lesson_number: 1,
                title: "L1".to_string(),
                lesson_link: None,
            }],
        };
        let json = serde_json::to_string(&course).unwrap();
        let back: Course = serde_json::from_str(&json).unwrap();
        assert_eq!(back, course);
        assert_eq!(back.lessons.len(), 1);
    }

    #[test]
    fn chunk_without_lesson_number() {
        let chunk = CourseChunk {
            content: "General content".to_string(),
            course_title: "Course".to_string(),
            lesson_number: None,
            chunk_index: 0,
        };
        assert!(chunk.lesson_number.is_none());
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["course_title"], "Course");
    }
}
