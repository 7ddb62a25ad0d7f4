//! Outbound admin messaging.
//!
//! The delivery engine only sees [`MessageTransport`]; the endpoint behind it
//! is treated as unreliable and any error simply fails the current attempt.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod telegram;

/// Sends one plain-text message to one recipient.
pub trait MessageTransport: Send + Sync {
    fn send(&self, recipient: &str, text: &str) -> Result<(), TransportError>;
}

impl<T: MessageTransport + ?Sized> MessageTransport for &T {
    fn send(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        (**self).send(recipient, text)
    }
}

impl<T: MessageTransport + ?Sized> MessageTransport for Box<T> {
    fn send(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        (**self).send(recipient, text)
    }
}

/// Transport failure for a single send.
#[derive(Debug)]
pub enum TransportError {
    /// Connection, TLS or timeout failure. The URL is stripped so bot
    /// credentials never reach logs or stored error messages.
    Http(reqwest::Error),
    /// Endpoint answered with a non-2xx status.
    Status { status: u16, body: String },
    /// Transport could not be constructed from its settings.
    Config(String),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(err) => write!(f, "request failed: {err}"),
            Self::Status { status, body } if body.is_empty() => {
                write!(f, "endpoint returned status {status}")
            }
            Self::Status { status, body } => {
                write!(f, "endpoint returned status {status}: {body}")
            }
            Self::Config(message) => write!(f, "invalid transport config: {message}"),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.without_url())
    }
}
