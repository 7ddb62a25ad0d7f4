//! Telegram Bot API transport (`POST {api_base}/bot<token>/sendMessage`).
//!
//! # Invariants
//! - Every request is bounded by the configured timeout.
//! - Non-2xx responses are errors; the body is kept, capped, for diagnostics.
//! - The bot token never appears in an error value.

use super::{MessageTransport, TransportError};
use reqwest::blocking::Client;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Blocking Telegram sender. Call from a blocking context only.
pub struct TelegramTransport {
    client: Client,
    endpoint: String,
}

impl TelegramTransport {
    pub fn new(api_base: &str, bot_token: &str, timeout: Duration) -> Result<Self, TransportError> {
        let bot_token = bot_token.trim();
        if bot_token.is_empty() {
            return Err(TransportError::Config("bot token is empty".to_string()));
        }
        let api_base = api_base.trim().trim_end_matches('/');
        if api_base.is_empty() {
            return Err(TransportError::Config("api base is empty".to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{api_base}/bot{bot_token}/sendMessage"),
        })
    }
}

impl MessageTransport for TelegramTransport {
    fn send(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("chat_id", recipient), ("text", text)])
            .send()?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body: cap_body(&body),
        })
    }
}

fn cap_body(body: &str) -> String {
    let flat = body.trim().replace(['\n', '\r'], " ");
    if flat.chars().count() <= MAX_ERROR_BODY_CHARS {
        return flat;
    }
    let mut capped: String = flat.chars().take(MAX_ERROR_BODY_CHARS).collect();
    capped.push_str("...");
    capped
}

#[cfg(test)]
mod tests {
    use super::{cap_body, TelegramTransport, MAX_ERROR_BODY_CHARS};
    use crate::transport::TransportError;
    use std::time::Duration;

    #[test]
    fn new_rejects_blank_token() {
        let result = TelegramTransport::new("https://api.telegram.org", "  ", Duration::from_secs(5));
        assert!(matches!(result, Err(TransportError::Config(_))));
    }

    #[test]
    fn endpoint_joins_base_and_token() {
        let transport =
            TelegramTransport::new("http://localhost:8081/", "123:abc", Duration::from_secs(5))
                .unwrap();
        assert_eq!(transport.endpoint, "http://localhost:8081/bot123:abc/sendMessage");
    }

    #[test]
    fn cap_body_flattens_and_truncates() {
        let long = "x\n".repeat(MAX_ERROR_BODY_CHARS);
        let capped = cap_body(&long);
        assert!(!capped.contains('\n'));
        assert!(capped.ends_with("..."));
        assert_eq!(cap_body(" {\"ok\":false} "), "{\"ok\":false}");
    }
}
