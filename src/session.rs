//! In-memory conversation sessions with bounded history.
//!
//! Sessions exist only for the process lifetime. Each session keeps at most
//! `max_history` exchanges (a user/assistant pair), evicting the oldest
//! messages first, so prompt size stays bounded no matter how long a
//! conversation runs.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
struct Message {
    role: Role,
    content: String,
}

/// Allocates session ids and tracks per-session history.
pub struct SessionManager {
    max_history: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    counter: u64,
    sessions: HashMap<String, Vec<Message>>,
}

impl SessionManager {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Create a new session and return its id (`session_1`, `session_2`, ...).
    pub fn create_session(&self) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.counter += 1;
        let id = format!("session_{}", inner.counter);
        inner.sessions.insert(id.clone(), Vec::new());
        id
    }

    /// Record a completed exchange. Unknown ids are created implicitly, so a
    /// client may bring its own session id.
    pub fn add_exchange(&self, session_id: &str, user_message: &str, assistant_message: &str) {
        let mut inner = self.inner.lock().unwrap();
        let messages = inner.sessions.entry(session_id.to_string()).or_default();
        messages.push(Message {
            role: Role::User,
            content: user_message.to_string(),
        });
        messages.push(Message {
            role: Role::Assistant,
            content: assistant_message.to_string(),
        });

        let max_messages = self.max_history * 2;
        if messages.len() > max_messages {
            let excess = messages.len() - max_messages;
            messages.drain(..excess);
        }
    }

    /// Formatted history for prompt injection, or `None` for an unknown or
    /// empty session.
    pub fn history(&self, session_id: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        let messages = inner.sessions.get(session_id)?;
        if messages.is_empty() {
            return None;
        }
        let lines: Vec<String> = messages
            .iter()
            .map(|m| match m.role {
                Role::User => format!("User: {}", m.content),
                Role::Assistant => format!("Assistant: {}", m.content),
            })
            .collect();
        Some(lines.join("\n"))
    }

    /// Drop a session and its history.
    pub fn clear_session(&self, session_id: &str) {
        self.inner.lock().unwrap().sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_sequential() {
        let manager = SessionManager::new(2);
        assert_eq!(manager.create_session(), "session_1");
        assert_eq!(manager.create_session(), "session_2");
    }

    #[test]
    fn new_session_has_no_history() {
        let manager = SessionManager::new(2);
        let id = manager.create_session();
        assert!(manager.history(&id).is_none());
        assert!(manager.history("never_seen").is_none());
    }

    #[test]
    fn history_formats_user_and_assistant_lines() {
        let manager = SessionManager::new(2);
        let id = manager.create_session();
        manager.add_exchange(&id, "What is MCP?", "A protocol.");

        let history = manager.history(&id).unwrap();
        assert_eq!(history, "User: What is MCP?\nAssistant: A protocol.");
    }

    #[test]
    fn oldest_exchange_is_evicted_first() {
        let manager = SessionManager::new(2);
        let id = manager.create_session();
        manager.add_exchange(&id, "q1", "a1");
        manager.add_exchange(&id, "q2", "a2");
        manager.add_exchange(&id, "q3", "a3");

        let history = manager.history(&id).unwrap();
        assert!(!history.contains("q1"));
        assert!(history.contains("q2"));
        assert!(history.contains("q3"));
        // Two exchanges, four lines.
        assert_eq!(history.lines().count(), 4);
    }

    #[test]
    fn unknown_session_id_is_created_on_first_exchange() {
        let manager = SessionManager::new(2);
        manager.add_exchange("client_chosen", "hello", "hi");
        assert!(manager.history("client_chosen").is_some());
    }

    #[test]
    fn clear_session_drops_history() {
        let manager = SessionManager::new(2);
        let id = manager.create_session();
        manager.add_exchange(&id, "q", "a");
        manager.clear_session(&id);
        assert!(manager.history(&id).is_none());
    }
}
