//! Course document parsing and sentence-aware chunking.
//!
//! A course document is a three-line header (`Course Title:`, optional
//! `Course Link:`, optional `Course Instructor:`) followed by lesson blocks,
//! each introduced by a `Lesson N: title` marker with an optional
//! `Lesson Link:` line. Lines that look like lesson markers but do not parse
//! are treated as body text, so a sloppy document degrades instead of
//! failing.
//!
//! Chunking splits lesson bodies into pieces of at most `chunk_size`
//! characters on sentence boundaries, with consecutive chunks overlapping by
//! up to `chunk_overlap` characters of trailing sentences. Chunk indices are
//! document-global and contiguous, so re-ingesting a document produces the
//! same set of record ids.

use crate::models::{Course, CourseChunk, Lesson};

/// Parsing error for a single document. Ingestion of other documents
/// continues when one document fails.
#[derive(Debug)]
pub enum ProcessError {
    MalformedDocument(String),
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::MalformedDocument(msg) => write!(f, "malformed document: {}", msg),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Parse a raw course document into a [`Course`] plus its content chunks.
pub fn process_document(
    raw_text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<(Course, Vec<CourseChunk>), ProcessError> {
    let lines: Vec<&str> = raw_text.lines().collect();

    let title = lines
        .first()
        .and_then(|l| l.trim().strip_prefix("Course Title:"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ProcessError::MalformedDocument("missing 'Course Title:' header on line 1".to_string())
        })?
        .to_string();

    let mut idx = 1;
    let mut course_link = None;
    let mut instructor = None;
    if let Some(l) = lines.get(idx).and_then(|l| l.trim().strip_prefix("Course Link:")) {
        course_link = Some(l.trim().to_string());
        idx += 1;
    }
    if let Some(l) = lines
        .get(idx)
        .and_then(|l| l.trim().strip_prefix("Course Instructor:"))
    {
        instructor = Some(l.trim().to_string());
        idx += 1;
    }

    let mut lessons: Vec<Lesson> = Vec::new();
    let mut chunks: Vec<CourseChunk> = Vec::new();
    let mut chunk_index: i64 = 0;

    // Text before the first lesson marker is course-level content.
    let mut preamble: Vec<&str> = Vec::new();
    let mut preamble_flushed = false;
    let mut current: Option<(i64, String, Option<String>, Vec<&str>)> = None;

    let mut i = idx;
    while i < lines.len() {
        let line = lines[i];
        if let Some((number, lesson_title)) = parse_lesson_marker(line) {
            if !preamble_flushed {
                flush_course_level(&title, &preamble, chunk_size, chunk_overlap, &mut chunks, &mut chunk_index);
                preamble_flushed = true;
            }
            if let Some(lesson) = current.take() {
                flush_lesson(&title, lesson, chunk_size, chunk_overlap, &mut lessons, &mut chunks, &mut chunk_index);
            }

            let mut lesson_link = None;
            if let Some(l) = lines
                .get(i + 1)
                .and_then(|l| l.trim().strip_prefix("Lesson Link:"))
            {
                lesson_link = Some(l.trim().to_string());
                i += 1;
            }
            current = Some((number, lesson_title, lesson_link, Vec::new()));
        } else {
            match current.as_mut() {
                Some((_, _, _, body)) => body.push(line),
                None => preamble.push(line),
            }
        }
        i += 1;
    }

    if let Some(lesson) = current.take() {
        flush_lesson(&title, lesson, chunk_size, chunk_overlap, &mut lessons, &mut chunks, &mut chunk_index);
    }
    if !preamble_flushed {
        flush_course_level(&title, &preamble, chunk_size, chunk_overlap, &mut chunks, &mut chunk_index);
    }

    let course = Course {
        title,
        course_link,
        instructor,
        lessons,
    };
    Ok((course, chunks))
}

fn flush_course_level(
    course_title: &str,
    preamble: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
    chunks: &mut Vec<CourseChunk>,
    chunk_index: &mut i64,
) {
    let body = preamble.join("\n");
    for (j, part) in chunk_text(&body, chunk_size, chunk_overlap).into_iter().enumerate() {
        let content = if j == 0 {
            // Synthetic context line for embedding quality
            format!("{}\n{}", course_title, part)
        } else {
            part
        };
        chunks.push(CourseChunk {
            content,
            course_title: course_title.to_string(),
            lesson_number: None,
            chunk_index: *chunk_index,
        });
        *chunk_index += 1;
    }
}

fn flush_lesson(
    course_title: &str,
    (number, lesson_title, lesson_link, body): (i64, String, Option<String>, Vec<&str>),
    chunk_size: usize,
    chunk_overlap: usize,
    lessons: &mut Vec<Lesson>,
    chunks: &mut Vec<CourseChunk>,
    chunk_index: &mut i64,
) {
    let text = body.join("\n");
    for (j, part) in chunk_text(&text, chunk_size, chunk_overlap).into_iter().enumerate() {
        let content = if j == 0 {
            format!("{} - Lesson {}: {}\n{}", course_title, number, lesson_title, part)
        } else {
            part
        };
        chunks.push(CourseChunk {
            content,
            course_title: course_title.to_string(),
            lesson_number: Some(number),
            chunk_index: *chunk_index,
        });
        *chunk_index += 1;
    }
    lessons.push(Lesson {
        lesson_number: number,
        title: lesson_title,
        lesson_link,
    });
}

/// Parse a `Lesson N: title` marker. Returns `None` for anything that does
/// not match exactly, which makes such lines fall through as body text.
fn parse_lesson_marker(line: &str) -> Option<(i64, String)> {
    let rest = line.trim().strip_prefix("Lesson ")?;
    let colon = rest.find(':')?;
    let number = rest[..colon].trim().parse::<i64>().ok()?;
    let title = rest[colon + 1..].trim().to_string();
    Some((number, title))
}

/// Split text into chunks of at most `chunk_size` characters on sentence
/// boundaries. Consecutive chunks overlap by up to `overlap` characters of
/// trailing sentences (copied text, not a reference). Empty input yields no
/// chunks.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Vec::new();
    }

    let sentences = split_sentences(&normalized);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < sentences.len() {
        // A single sentence longer than the chunk size is hard-split at
        // space boundaries.
        if sentences[start].len() > chunk_size {
            chunks.extend(hard_split(&sentences[start], chunk_size));
            start += 1;
            continue;
        }

        let mut end = start;
        let mut size = 0usize;
        while end < sentences.len() {
            let s_len = sentences[end].len();
            let would_be = if size == 0 { s_len } else { size + 1 + s_len };
            if would_be > chunk_size {
                break;
            }
            size = would_be;
            end += 1;
        }
        if end == start {
            end = start + 1;
        }

        chunks.push(sentences[start..end].join(" "));

        if end >= sentences.len() {
            break;
        }
        start = overlap_start(start, end, &sentences, overlap);
    }

    chunks
}

/// Next chunk's first sentence index: walk back from `end` while the
/// re-included sentences still fit in the overlap budget. Always lands in
/// `(start, end]` so the loop makes progress.
fn overlap_start(start: usize, end: usize, sentences: &[String], overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }
    let mut k = end;
    let mut acc = 0usize;
    while k > start + 1 {
        let add = sentences[k - 1].len() + if acc > 0 { 1 } else { 0 };
        if acc + add > overlap {
            break;
        }
        acc += add;
        k -= 1;
    }
    k
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let next_is_break = iter
                .peek()
                .map(|(_, n)| n.is_whitespace())
                .unwrap_or(true);
            if next_is_break && end > start {
                let s = text[start..end].trim();
                if !s.is_empty() {
                    sentences.push(s.to_string());
                }
                start = end;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn hard_split(sentence: &str, chunk_size: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = sentence;
    while !remaining.is_empty() {
        if remaining.len() <= chunk_size {
            out.push(remaining.to_string());
            break;
        }
        let mut cut = chunk_size;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        let split_at = remaining[..cut].rfind(' ').map(|p| p + 1).unwrap_or(cut);
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }
    out
}
