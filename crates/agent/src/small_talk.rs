use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::warn;

/// Chit-chat backend behind `chatForFun`. `None` means nothing worth sending.
#[async_trait]
pub trait SmallTalk: Send + Sync {
    async fn reply(&self, text: &str) -> Option<String>;
}

/// Calls `GET {url}?q=<text>` and answers with the `res` field of the JSON
/// body. Any failure is logged and yields no reply.
pub struct HttpSmallTalk {
    client: Client,
    url: String,
}

impl HttpSmallTalk {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl SmallTalk for HttpSmallTalk {
    async fn reply(&self, text: &str) -> Option<String> {
        let response = match self.client.get(&self.url).query(&[("q", text)]).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    event_name = "small_talk.request_failed",
                    error = %error,
                    "small talk backend unreachable"
                );
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                event_name = "small_talk.request_failed",
                status = %response.status(),
                "small talk backend returned an error status"
            );
            return None;
        }

        let body: Value = response.json().await.ok()?;
        match body.get("res")? {
            Value::String(reply) if !reply.trim().is_empty() => Some(reply.clone()),
            Value::String(_) | Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Offline replies, chosen deterministically from the incoming text.
#[derive(Clone, Debug)]
pub struct CannedSmallTalk {
    replies: Vec<String>,
}

impl Default for CannedSmallTalk {
    fn default() -> Self {
        Self::new(vec![
            "Ha, good one! I'm mostly here to help with your orders though.".to_owned(),
            "I like chatting! Ask me to track or cancel an order any time.".to_owned(),
            "Interesting. Is there an order I can help you with?".to_owned(),
        ])
    }
}

impl CannedSmallTalk {
    pub fn new(replies: Vec<String>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl SmallTalk for CannedSmallTalk {
    async fn reply(&self, text: &str) -> Option<String> {
        if self.replies.is_empty() {
            return None;
        }
        let index = text.chars().count() % self.replies.len();
        self.replies.get(index).cloned()
    }
}
