use serde_json::json;
use thiserror::Error;
use tokio::time::{sleep, Duration};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const MAX_RETRIES: u32 = 3;

/// Telegram caps messages at 4096 chars; staying under leaves headroom
/// for formatting entities
pub const MAX_MESSAGE_CHARS: usize = 3900;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("telegram rate limited")]
    RateLimited,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("telegram api error ({status}): {body}")]
    Api { status: u16, body: String },
}

/// Split a digest into sendable chunks on paragraph boundaries
///
/// A single paragraph longer than the limit is hard-split; everything
/// else keeps its paragraphs whole.
pub fn chunk_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for para in text.split("\n\n") {
        let para_len = para.chars().count();
        let sep_len = if current_len == 0 { 0 } else { 2 };

        if current_len + sep_len + para_len > limit {
            if current_len > 0 {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if para_len > limit {
                let mut buf = String::new();
                let mut buf_len = 0usize;
                for ch in para.chars() {
                    if buf_len == limit {
                        chunks.push(std::mem::take(&mut buf));
                        buf_len = 0;
                    }
                    buf.push(ch);
                    buf_len += 1;
                }
                current = buf;
                current_len = buf_len;
                continue;
            }
        }

        if current_len > 0 {
            current.push_str("\n\n");
            current_len += 2;
        }
        current.push_str(para);
        current_len += para_len;
    }

    if current_len > 0 {
        chunks.push(current);
    }
    chunks
}

/// Telegram delivery channel
pub struct TelegramNotifier {
    client: reqwest::Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Result<Self, NotifyError> {
        Self::with_base_url(token, chat_id, TELEGRAM_API_BASE.to_string())
    }

    pub fn with_base_url(
        token: String,
        chat_id: String,
        base_url: String,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url,
            token,
            chat_id,
        })
    }

    /// Deliver a digest, chunked, in order
    ///
    /// A failed chunk aborts the rest so the digest is never delivered
    /// out of order.
    pub async fn send(&self, text: &str) -> Result<(), NotifyError> {
        for chunk in chunk_message(text, MAX_MESSAGE_CHARS) {
            self.send_chunk(&chunk).await?;
        }
        Ok(())
    }

    /// One chunk, Markdown first with a plain-text fallback
    ///
    /// Telegram rejects unbalanced formatting entities with a 400; the
    /// content still matters more than the styling.
    async fn send_chunk(&self, chunk: &str) -> Result<(), NotifyError> {
        match self.post(chunk, Some("Markdown")).await {
            Ok(()) => Ok(()),
            Err(NotifyError::Api { status: 400, .. }) => {
                tracing::warn!("Telegram rejected Markdown, resending as plain text");
                self.post(chunk, None).await
            }
            Err(e) => Err(e),
        }
    }

    async fn post(&self, text: &str, parse_mode: Option<&str>) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let mut payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = json!(mode);
        }

        let mut last_network: Option<reqwest::Error> = None;

        for attempt in 1..=MAX_RETRIES {
            match self.client.post(&url).json(&payload).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }

                    if status.as_u16() == 429 {
                        if attempt == MAX_RETRIES {
                            return Err(NotifyError::RateLimited);
                        }
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "Telegram rate limited, backing off {}s (attempt {}/{})",
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        sleep(Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    if status.is_server_error() && attempt < MAX_RETRIES {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "Telegram server error {}, retrying in {}s",
                            status,
                            backoff_secs
                        );
                        sleep(Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(NotifyError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!("Telegram network error: {}, retrying", e);
                    last_network = Some(e);
                    sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
                Err(e) => return Err(NotifyError::Network(e)),
            }
        }

        match last_network {
            Some(e) => Err(NotifyError::Network(e)),
            None => Err(NotifyError::RateLimited),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_short_message_single_chunk() {
        let chunks = chunk_message("hello", 3900);
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn test_chunks_split_on_paragraphs() {
        let para_a = "a".repeat(50);
        let para_b = "b".repeat(50);
        let para_c = "c".repeat(50);
        let text = format!("{}\n\n{}\n\n{}", para_a, para_b, para_c);

        // Limit fits two paragraphs plus their separator, not three
        let chunks = chunk_message(&text, 110);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{}\n\n{}", para_a, para_b));
        assert_eq!(chunks[1], para_c);
    }

    #[test]
    fn test_oversized_paragraph_hard_split() {
        let text = "x".repeat(250);
        let chunks = chunk_message(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[2].len(), 50);
    }

    #[test]
    fn test_chunks_preserve_content() {
        let text = (0..40)
            .map(|i| format!("paragraph number {}", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_message(&text, 120);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.join("\n\n"), text);
    }

    #[tokio::test]
    async fn test_send_markdown_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bottoken/sendMessage")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "parse_mode": "Markdown",
                "text": "hello",
            })))
            .with_status(200)
            .with_body("{\"ok\":true}")
            .expect(1)
            .create_async()
            .await;

        let notifier = TelegramNotifier::with_base_url(
            "token".to_string(),
            "123".to_string(),
            server.url(),
        )
        .unwrap();

        notifier.send("hello").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_markdown_rejection_falls_back_to_plain() {
        let mut server = mockito::Server::new_async().await;
        let md_mock = server
            .mock("POST", "/bottoken/sendMessage")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "parse_mode": "Markdown",
            })))
            .with_status(400)
            .with_body("{\"ok\":false,\"description\":\"can't parse entities\"}")
            .expect(1)
            .create_async()
            .await;
        let plain_mock = server
            .mock("POST", "/bottoken/sendMessage")
            .match_body(Matcher::Json(serde_json::json!({
                "chat_id": "123",
                "text": "broken *markdown",
                "disable_web_page_preview": true,
            })))
            .with_status(200)
            .with_body("{\"ok\":true}")
            .expect(1)
            .create_async()
            .await;

        let notifier = TelegramNotifier::with_base_url(
            "token".to_string(),
            "123".to_string(),
            server.url(),
        )
        .unwrap();

        notifier.send("broken *markdown").await.unwrap();
        md_mock.assert_async().await;
        plain_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_hard_api_error_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bottoken/sendMessage")
            .with_status(403)
            .with_body("{\"ok\":false,\"description\":\"bot was blocked\"}")
            .expect(1)
            .create_async()
            .await;

        let notifier = TelegramNotifier::with_base_url(
            "token".to_string(),
            "123".to_string(),
            server.url(),
        )
        .unwrap();

        let result = notifier.send("hello").await;
        mock.assert_async().await;
        assert!(matches!(result, Err(NotifyError::Api { status: 403, .. })));
    }
}
