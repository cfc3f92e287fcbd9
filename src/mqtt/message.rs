use chrono::NaiveDateTime;
use std::fmt;

/// Longest payload prefix shown in diagnostic records
const PREVIEW_LEN: usize = 32;

/// One message delivered by the broker, stamped with the local receive time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    topic: String,
    payload: Vec<u8>,
    received_at: NaiveDateTime,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: chrono::Local::now().naive_local(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Lossy text rendering of the payload, cut to a readable length
    pub fn preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        if text.chars().count() <= PREVIEW_LEN {
            return text.into_owned();
        }
        let mut cut: String = text.chars().take(PREVIEW_LEN).collect();
        cut.push('…');
        cut
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} ({} bytes): {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.payload.len(),
            self.preview()
        )
    }
}
