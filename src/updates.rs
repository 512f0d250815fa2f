//! Discover chat ids from the messages people sent to the bot.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::DispatchError;
use crate::transport::{Transport, method_url};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCandidate {
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub text: String,
}

impl std::fmt::Display for ChatCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text: String = if self.text.chars().count() > 50 {
            format!("{}...", self.text.chars().take(50).collect::<String>())
        } else {
            self.text.clone()
        };
        write!(
            f,
            "{} @{} ({}): {}",
            self.chat_id,
            self.username.as_deref().unwrap_or("NOUSERNAME"),
            self.first_name.as_deref().unwrap_or("NOFIRSTNAME"),
            text
        )
    }
}

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

/// One candidate per chat, keeping the latest message text.
pub async fn fetch_chat_candidates<T: Transport>(
    transport: &T,
    api_base: &str,
    api_key: &str,
) -> Result<Vec<ChatCandidate>, DispatchError> {
    let url = method_url(api_base, api_key, "getUpdates");
    let reply = transport.get(&url).await.map_err(|failure| {
        DispatchError::InvalidConfiguration(format!("getUpdates failed: {}", failure))
    })?;
    let envelope = reply.envelope().ok_or_else(|| {
        DispatchError::InvalidConfiguration(format!("getUpdates failed: HTTP {}", reply.status))
    })?;
    if !envelope.ok {
        return Err(DispatchError::InvalidConfiguration(format!(
            "getUpdates failed: {}",
            envelope.description.unwrap_or_else(|| "Unknown error".to_string())
        )));
    }

    let updates: Vec<Update> = envelope
        .result
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| DispatchError::InvalidConfiguration(format!("unexpected getUpdates result: {}", e)))?
        .unwrap_or_default();
    debug!(updates = updates.len(), "updates received");

    let mut by_chat: BTreeMap<i64, ChatCandidate> = BTreeMap::new();
    for message in updates.into_iter().filter_map(|update| update.message) {
        let (username, first_name) = match message.from {
            Some(user) => (user.username, user.first_name),
            None => (message.chat.username, message.chat.first_name),
        };
        by_chat.insert(
            message.chat.id,
            ChatCandidate {
                chat_id: message.chat.id,
                username,
                first_name,
                text: message.text.unwrap_or_default(),
            },
        );
    }
    info!(chats = by_chat.len(), "chat candidates found");
    Ok(by_chat.into_values().collect())
}

/// Drop chats already saved and those not matching the optional filters.
pub fn filter_candidates(
    candidates: Vec<ChatCandidate>,
    known_ids: &BTreeSet<i64>,
    username: Option<&str>,
    text: Option<&str>,
) -> Vec<ChatCandidate> {
    let username = username.map(|name| name.trim_start_matches('@'));
    candidates
        .into_iter()
        .filter(|c| !known_ids.contains(&c.chat_id))
        .filter(|c| text.is_none_or(|wanted| c.text == wanted))
        .filter(|c| match (username, c.username.as_deref()) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpTransport;
    use mockito::Server;
    use std::time::Duration;

    const UPDATES: &str = r#"{"ok":true,"result":[
        {"update_id":1,"message":{"message_id":1,"from":{"id":111,"is_bot":false,"first_name":"Alice","username":"alice"},"chat":{"id":111,"type":"private"},"text":"hi"}},
        {"update_id":2,"message":{"message_id":2,"from":{"id":222,"is_bot":false,"first_name":"Bob"},"chat":{"id":222,"type":"private"},"text":"subscribe"}},
        {"update_id":3,"message":{"message_id":3,"from":{"id":111,"is_bot":false,"first_name":"Alice","username":"alice"},"chat":{"id":111,"type":"private"},"text":"again"}},
        {"update_id":4,"edited_message":{"message_id":1}}
    ]}"#;

    async fn candidates_from(body: &str) -> Result<Vec<ChatCandidate>, DispatchError> {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/botKEY/getUpdates")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let result = fetch_chat_candidates(&transport, &server.url(), "KEY").await;
        mock.assert_async().await;
        result
    }

    #[tokio::test]
    async fn test_fetch_deduplicates_by_chat() {
        let candidates = candidates_from(UPDATES).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].chat_id, 111);
        assert_eq!(candidates[0].text, "again");
        assert_eq!(candidates[0].username.as_deref(), Some("alice"));
        assert_eq!(candidates[1].username, None);
        assert_eq!(candidates[1].first_name.as_deref(), Some("Bob"));
    }

    #[tokio::test]
    async fn test_fetch_empty_and_rejected() {
        let candidates = candidates_from(r#"{"ok":true,"result":[]}"#).await.unwrap();
        assert!(candidates.is_empty());

        let err = candidates_from(r#"{"ok":false,"description":"Conflict: webhook is active"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("webhook is active"));
    }

    #[test]
    fn test_filter_candidates() {
        let candidates = vec![
            ChatCandidate { chat_id: 1, username: Some("alice".into()), first_name: None, text: "hi".into() },
            ChatCandidate { chat_id: 2, username: Some("bob".into()), first_name: None, text: "subscribe".into() },
            ChatCandidate { chat_id: 3, username: None, first_name: Some("Carol".into()), text: "subscribe".into() },
        ];
        let known: BTreeSet<i64> = [1].into_iter().collect();

        let left = filter_candidates(candidates.clone(), &known, None, None);
        assert_eq!(left.iter().map(|c| c.chat_id).collect::<Vec<_>>(), vec![2, 3]);

        let left = filter_candidates(candidates.clone(), &BTreeSet::new(), Some("@bob"), None);
        assert_eq!(left.iter().map(|c| c.chat_id).collect::<Vec<_>>(), vec![2, 3]);

        let left = filter_candidates(candidates, &BTreeSet::new(), None, Some("hi"));
        assert_eq!(left.iter().map(|c| c.chat_id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_candidate_display_shortens_text() {
        let candidate = ChatCandidate {
            chat_id: 7,
            username: None,
            first_name: None,
            text: "x".repeat(60),
        };
        assert_eq!(candidate.to_string(), format!("7 @NOUSERNAME (NOFIRSTNAME): {}...", "x".repeat(50)));
    }
}
