//! Delivery of race commentary to chat channels.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::logging::{log, obj, v_str, Domain, Level};

#[async_trait]
pub trait ChannelNotifier {
    async fn post(&self, server_id: u64, channel_id: u64, text: &str) -> Result<()>;
}

/// Writes every post to the structured log. Used when no chat platform is
/// attached.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl ChannelNotifier for LogNotifier {
    async fn post(&self, server_id: u64, channel_id: u64, text: &str) -> Result<()> {
        log(
            Level::Info,
            Domain::Race,
            "post",
            obj(&[
                ("server_id", json!(server_id)),
                ("channel_id", json!(channel_id)),
                ("msg", v_str(text)),
            ]),
        );
        Ok(())
    }
}

/// Keeps posts in memory, for embedding hosts that relay them in bulk.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    posts: Mutex<Vec<(u64, u64, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(u64, u64, String)> {
        match self.posts.lock() {
            Ok(mut posts) => std::mem::take(&mut *posts),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl ChannelNotifier for RecordingNotifier {
    async fn post(&self, server_id: u64, channel_id: u64, text: &str) -> Result<()> {
        if let Ok(mut posts) = self.posts.lock() {
            posts.push((server_id, channel_id, text.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_notifier_drains() {
        let n = RecordingNotifier::new();
        n.post(1, 2, "hello").await.unwrap();
        n.post(1, 3, "again").await.unwrap();
        let posts = n.take();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0], (1, 2, "hello".to_string()));
        assert!(n.take().is_empty());
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.post(1, 2, "Race starting soon").await.is_ok());
    }
}
