//! Application-level WebSocket messages.

use bytes::Bytes;

use crate::http::Body;

use super::frame::Opcode;

/// Whether a message carries UTF-8 text or arbitrary bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

impl MessageKind {
    pub(crate) fn opcode(self) -> Opcode {
        match self {
            MessageKind::Text => Opcode::Text,
            MessageKind::Binary => Opcode::Binary,
        }
    }
}

/// A Text or Binary message.
///
/// Received messages stream their payload from the connection through
/// [`Message::body_mut`]; the payload is only valid until the next call to
/// `receive` on the same session.
#[derive(Debug)]
pub struct Message {
    kind: MessageKind,
    body: Body,
}

impl Message {
    pub fn new(kind: MessageKind, body: impl Into<Body>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Self::new(MessageKind::Text, text)
    }

    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        let bytes: Bytes = bytes.into();
        Self::new(MessageKind::Binary, bytes)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Read the whole payload as text.
    pub async fn into_text(mut self) -> std::io::Result<String> {
        self.body.to_text().await
    }

    /// Read the whole payload.
    pub async fn into_bytes(mut self) -> std::io::Result<Bytes> {
        self.body.to_bytes().await
    }
}

/// Status code and reason the peer (or we) closed with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseMessage {
    pub code: Option<u16>,
    pub reason: Option<String>,
}

impl CloseMessage {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: Some(reason.into()),
        }
    }

    /// Normal closure (1000) without a reason.
    pub fn normal() -> Self {
        Self {
            code: Some(1000),
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_message_reads_back() {
        let message = Message::text("héllo");
        assert!(message.is_text());
        assert_eq!(message.into_text().await.unwrap(), "héllo");
    }

    #[tokio::test]
    async fn binary_message_keeps_length() {
        let mut message = Message::binary(vec![1u8, 2, 3]);
        assert_eq!(message.kind(), MessageKind::Binary);
        assert_eq!(message.body_mut().len(), Some(3));
        assert_eq!(&message.into_bytes().await.unwrap()[..], &[1, 2, 3]);
    }

    #[test]
    fn normal_close_has_code_1000() {
        assert_eq!(CloseMessage::normal().code, Some(1000));
        assert_eq!(CloseMessage::new(1001, "away").reason.as_deref(), Some("away"));
    }
}
