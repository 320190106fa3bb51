//! # Conversation Session Manager
//!
//! Keeps one bounded `ConversationHistory` per chat session and drives the
//! chat-completion call for each user message.
//!
//! ## Thread Safety:
//! - The session map sits behind a `tokio::sync::RwLock`; it is only held while
//!   looking up, inserting or evicting entries, never across the API call
//! - Each session has its own `tokio::sync::Mutex`, held for the whole
//!   append → trim → call → append sequence, so two requests for the same
//!   session run one after the other and a session never sees another's turns
//!
//! ## Failure policy:
//! If the chat-completion call fails, the session's history is put back exactly
//! as it was before the request, so a retry doesn't leave a dangling user turn.

use crate::chat::client::{ChatCompletionClient, ModelConfig};
use crate::chat::history::{ChatTurn, ConversationHistory};
use crate::config::ChatConfig;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Session used when the client doesn't name one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Longest session id accepted from a client.
const MAX_SESSION_ID_LEN: usize = 128;

struct SessionState {
    history: ConversationHistory,
    last_active: DateTime<Utc>,
}

type SharedSession = Arc<Mutex<SessionState>>;

pub struct ConversationSessionManager {
    sessions: RwLock<HashMap<String, SharedSession>>,
    client: Arc<dyn ChatCompletionClient>,
    model: ModelConfig,
    system_prompt: String,
    max_history: usize,
    max_sessions: usize,
}

impl ConversationSessionManager {
    pub fn new(client: Arc<dyn ChatCompletionClient>, config: &ChatConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            client,
            model: ModelConfig::from(config),
            system_prompt: config.system_prompt.clone(),
            max_history: config.max_history,
            max_sessions: config.max_sessions,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model.model
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Answer one user message within the given session.
    ///
    /// ## Returns:
    /// - **Ok(reply)**: the assistant's reply, already appended to the history
    /// - **Err(InvalidRequest)**: blank message or unusable session id; nothing changed
    /// - **Err(ChatUnavailable)**: the API call failed; history restored
    pub async fn respond(&self, session_id: &str, user_input: &str) -> AppResult<String> {
        let message = user_input.trim();
        if message.is_empty() {
            return Err(AppError::InvalidRequest("Message cannot be empty".to_string()));
        }
        validate_session_id(session_id)?;

        let session = self.session(session_id).await;
        let mut state = session.lock().await;

        let checkpoint = state.history.clone();
        state.history.push(ChatTurn::user(message));

        let messages = state.history.messages();
        match self.client.complete(&messages, &self.model).await {
            Ok(reply) => {
                state.history.push(ChatTurn::assistant(reply.clone()));
                state.last_active = Utc::now();
                debug!(
                    session_id = %session_id,
                    history_len = state.history.len(),
                    capacity = state.history.capacity(),
                    "Chat turn recorded"
                );
                Ok(reply)
            }
            Err(e) => {
                state.history = checkpoint;
                warn!(session_id = %session_id, error = %e, "Chat completion failed");
                Err(AppError::ChatUnavailable(e.to_string()))
            }
        }
    }

    /// Fetch a session, creating it (and evicting if full) when it doesn't exist yet.
    async fn session(&self, session_id: &str) -> SharedSession {
        if let Some(existing) = self.sessions.read().await.get(session_id) {
            return existing.clone();
        }

        let mut sessions = self.sessions.write().await;
        // Another request may have created it between the two locks
        if let Some(existing) = sessions.get(session_id) {
            return existing.clone();
        }

        if sessions.len() >= self.max_sessions {
            evict_least_recent(&mut sessions);
        }

        let session = Arc::new(Mutex::new(SessionState {
            history: ConversationHistory::new(self.system_prompt.clone(), self.max_history),
            last_active: Utc::now(),
        }));
        sessions.insert(session_id.to_string(), session.clone());
        info!(session_id = %session_id, total = sessions.len(), "Chat session created");
        session
    }

    /// Remove sessions idle for longer than `max_idle_secs`.
    ///
    /// Sessions in the middle of a request are locked and therefore skipped. An idle
    /// limit reaching back past the earliest representable time evicts nothing.
    pub async fn evict_idle(&self, max_idle_secs: u64) -> usize {
        let Some(cutoff) = idle_cutoff(Utc::now(), max_idle_secs) else {
            return 0;
        };
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|_, session| match session.try_lock() {
            Ok(state) => state.last_active >= cutoff,
            Err(_) => true,
        });

        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "Evicted idle chat sessions");
        }
        removed
    }

    #[cfg(test)]
    pub(crate) async fn messages(&self, session_id: &str) -> Option<Vec<ChatTurn>> {
        let session = self.sessions.read().await.get(session_id)?.clone();
        let state = session.lock().await;
        Some(state.history.messages())
    }
}

/// `now - max_idle_secs`, or `None` when that instant can't be represented.
fn idle_cutoff(now: DateTime<Utc>, max_idle_secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(max_idle_secs).ok()?;
    let idle = chrono::Duration::try_seconds(secs)?;
    now.checked_sub_signed(idle)
}

fn validate_session_id(session_id: &str) -> AppResult<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidRequest("Invalid session id".to_string()))
    }
}

/// Drop the idle session with the oldest activity. Busy sessions are never picked.
fn evict_least_recent(sessions: &mut HashMap<String, SharedSession>) {
    let oldest = sessions
        .iter()
        .filter_map(|(id, session)| {
            let state = session.try_lock().ok()?;
            Some((id.clone(), state.last_active))
        })
        .min_by_key(|(_, last_active)| *last_active)
        .map(|(id, _)| id);

    if let Some(id) = oldest {
        sessions.remove(&id);
        info!(session_id = %id, "Evicted least recently used chat session");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chat::client::ChatClientError;
    use crate::chat::history::ChatRole;
    use crate::config::AppConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replies "reply to <last user message>"; can be switched to fail.
    pub(crate) struct EchoClient {
        pub calls: AtomicUsize,
        pub fail: AtomicBool,
        pub delay: Duration,
        pub seen: std::sync::Mutex<Vec<Vec<ChatTurn>>>,
    }

    impl EchoClient {
        pub(crate) fn new() -> Arc<Self> {
            Self::with_delay(Duration::ZERO)
        }

        pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay,
                seen: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatCompletionClient for EchoClient {
        async fn complete(&self, history: &[ChatTurn], _model: &ModelConfig) -> Result<String, ChatClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(history.to_vec());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChatClientError::ApiRequestFailed("status 503".to_string()));
            }
            let last = history.last().map(|t| t.content.clone()).unwrap_or_default();
            Ok(format!("reply to {}", last))
        }
    }

    pub(crate) fn chat_config(max_history: usize) -> ChatConfig {
        let mut config = AppConfig::default().chat;
        config.max_history = max_history;
        config.system_prompt = "persona".to_string();
        config
    }

    #[tokio::test]
    async fn test_blank_message_rejected_without_creating_session() {
        let client = EchoClient::new();
        let manager = ConversationSessionManager::new(client.clone(), &chat_config(10));

        for input in ["", "   ", "\n\t"] {
            let err = manager.respond("default", input).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidRequest(ref m) if m == "Message cannot be empty"));
        }

        assert_eq!(manager.session_count().await, 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_message_leaves_existing_history_untouched() {
        let client = EchoClient::new();
        let manager = ConversationSessionManager::new(client.clone(), &chat_config(10));
        manager.respond("s1", "my throat hurts after singing").await.unwrap();
        let before = manager.messages("s1").await.unwrap();

        for input in ["", "   ", "\n\t"] {
            assert!(manager.respond("s1", input).await.is_err());
        }

        assert_eq!(manager.messages("s1").await.unwrap(), before);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_each_turn_adds_user_and_assistant() {
        let manager = ConversationSessionManager::new(EchoClient::new(), &chat_config(10));

        let reply = manager.respond("s1", "  hello  ").await.unwrap();
        assert_eq!(reply, "reply to hello");

        let messages = manager.messages("s1").await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ChatTurn::system("persona"));
        assert_eq!(messages[1], ChatTurn::user("hello"));
        assert_eq!(messages[2], ChatTurn::assistant("reply to hello"));

        manager.respond("s1", "again").await.unwrap();
        assert_eq!(manager.messages("s1").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_history_capped_with_persona_first() {
        let max_history = 3;
        let client = EchoClient::new();
        let manager = ConversationSessionManager::new(client.clone(), &chat_config(max_history));

        for i in 0..10 {
            manager.respond("s1", &format!("q{}", i)).await.unwrap();
            let messages = manager.messages("s1").await.unwrap();
            assert!(messages.len() <= 2 * max_history + 1);
            assert_eq!(messages[0].role, ChatRole::System);
        }

        let messages = manager.messages("s1").await.unwrap();
        assert_eq!(messages.len(), 7);
        assert_eq!(messages.last().unwrap().content, "reply to q9");
        assert_eq!(messages[1].content, "q7");

        // The API always saw the persona first and never more than the cap
        for sent in client.seen.lock().unwrap().iter() {
            assert_eq!(sent[0], ChatTurn::system("persona"));
            assert!(sent.len() <= 2 * max_history + 1);
        }
    }

    #[tokio::test]
    async fn test_failed_call_restores_history() {
        let client = EchoClient::new();
        let manager = ConversationSessionManager::new(client.clone(), &chat_config(10));
        manager.respond("s1", "first").await.unwrap();
        let before = manager.messages("s1").await.unwrap();

        client.fail.store(true, Ordering::SeqCst);
        let err = manager.respond("s1", "second").await.unwrap_err();
        assert!(matches!(err, AppError::ChatUnavailable(_)));

        assert_eq!(manager.messages("s1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let manager = ConversationSessionManager::new(EchoClient::new(), &chat_config(10));
        manager.respond("alice", "my voice is hoarse").await.unwrap();
        manager.respond("bob", "how do I warm up?").await.unwrap();

        let alice = manager.messages("alice").await.unwrap();
        assert!(alice.iter().all(|t| !t.content.contains("warm up")));
        assert_eq!(manager.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_turns_in_one_session_stay_paired() {
        let manager = Arc::new(ConversationSessionManager::new(
            EchoClient::with_delay(Duration::from_millis(5)),
            &chat_config(50),
        ));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.respond("shared", &format!("m{}", i)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let messages = manager.messages("shared").await.unwrap();
        assert_eq!(messages.len(), 17);
        // Every user turn is immediately followed by its own reply
        for pair in messages[1..].chunks(2) {
            assert_eq!(pair[0].role, ChatRole::User);
            assert_eq!(pair[1].content, format!("reply to {}", pair[0].content));
        }
    }

    #[tokio::test]
    async fn test_concurrent_sessions_never_see_each_other() {
        let client = EchoClient::with_delay(Duration::from_millis(3));
        let manager = Arc::new(ConversationSessionManager::new(client.clone(), &chat_config(50)));

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let manager = manager.clone();
                let session = if i % 2 == 0 { "alice" } else { "bob" };
                tokio::spawn(async move {
                    manager.respond(session, &format!("{}-{}", session, i)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for session in ["alice", "bob"] {
            let messages = manager.messages(session).await.unwrap();
            assert_eq!(messages.len(), 13);
            assert_eq!(messages[0], ChatTurn::system("persona"));
            for pair in messages[1..].chunks(2) {
                assert!(pair[0].content.starts_with(session), "{:?}", pair[0]);
                assert_eq!(pair[1].content, format!("reply to {}", pair[0].content));
            }
        }

        // Every request the API saw carried turns from one session only
        for sent in client.seen.lock().unwrap().iter() {
            let users: Vec<_> = sent.iter().filter(|t| t.role == ChatRole::User).collect();
            let owner = users[0].content.split('-').next().unwrap().to_string();
            assert!(users.iter().all(|t| t.content.starts_with(&owner)));
        }
    }

    #[tokio::test]
    async fn test_invalid_session_id_rejected() {
        let manager = ConversationSessionManager::new(EchoClient::new(), &chat_config(10));
        let long = "x".repeat(MAX_SESSION_ID_LEN + 1);
        for id in ["", "../etc", "with space", long.as_str()] {
            assert!(manager.respond(id, "hi").await.is_err(), "{:?}", id);
        }
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_store_evicts_least_recent() {
        let mut config = chat_config(10);
        config.max_sessions = 2;
        let manager = ConversationSessionManager::new(EchoClient::new(), &config);

        manager.respond("a", "1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.respond("b", "1").await.unwrap();
        manager.respond("c", "1").await.unwrap();

        assert_eq!(manager.session_count().await, 2);
        assert!(manager.messages("a").await.is_none());
        assert!(manager.messages("c").await.is_some());
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let manager = ConversationSessionManager::new(EchoClient::new(), &chat_config(10));
        manager.respond("a", "1").await.unwrap();

        assert_eq!(manager.evict_idle(3600).await, 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.evict_idle(0).await, 1);
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_huge_idle_limit_keeps_fresh_sessions() {
        let manager = ConversationSessionManager::new(EchoClient::new(), &chat_config(10));
        manager.respond("a", "1").await.unwrap();

        for secs in [u64::MAX, i64::MAX as u64, 9_300_000_000_000_000] {
            assert_eq!(manager.evict_idle(secs).await, 0, "{}", secs);
        }
        assert_eq!(manager.session_count().await, 1);
    }

    #[test]
    fn test_idle_cutoff_bounds() {
        let now = Utc::now();
        assert_eq!(idle_cutoff(now, 60), Some(now - chrono::Duration::seconds(60)));
        assert!(idle_cutoff(now, u64::MAX).is_none());
    }
}
