//! Notification transport collaborator and message rendering.
//!
//! The engine composes the message text; delivery mechanics and recipient
//! credential management belong to the collaborator behind the trait.

use async_trait::async_trait;

use crate::error::FamCalResult;
use crate::notify::scheduler::Phase;
use crate::recurrence::Occurrence;

/// The consumed delivery channel.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, recipient: &str, message: &str) -> FamCalResult<()>;
}

/// Render the reminder text for one occurrence and phase.
pub fn render_message(occurrence: &Occurrence, phase: Phase) -> String {
    let (verb, at) = match phase {
        Phase::Start => ("starts", occurrence.start),
        Phase::End => ("ends", occurrence.end.unwrap_or(occurrence.start)),
    };

    let mut message = format!(
        "{} {} at {}",
        occurrence.title,
        verb,
        at.format("%Y-%m-%d %H:%M")
    );
    if let Some(description) = &occurrence.description {
        message.push('\n');
        message.push_str(description);
    }
    message
}
