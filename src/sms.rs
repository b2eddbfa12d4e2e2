//! SMS body construction and multipart splitting.

use crate::capabilities::{CapabilityResult, Location, Messenger};
use tracing::info;

/// Longest body that still fits in a single SMS.
pub const SINGLE_SMS_LIMIT: usize = 160;

/// Payload of one segment of a concatenated SMS (160 minus the 7-char header).
pub const MULTIPART_SEGMENT_LIMIT: usize = 153;

/// Split `body` into SMS parts.
///
/// Bodies up to [`SINGLE_SMS_LIMIT`] characters are returned as one part;
/// longer bodies are cut into [`MULTIPART_SEGMENT_LIMIT`]-character segments.
/// Splits happen on `char` boundaries and the parts concatenate back to
/// `body`.
#[must_use]
pub fn split_message(body: &str) -> Vec<String> {
    if body.chars().count() <= SINGLE_SMS_LIMIT {
        return vec![body.to_owned()];
    }
    let chars: Vec<char> = body.chars().collect();
    chars
        .chunks(MULTIPART_SEGMENT_LIMIT)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Send `body` to `number`, splitting it when needed. Parts go out in order
/// and sending stops at the first failed part.
///
/// Returns the number of parts sent.
///
/// # Errors
///
/// Returns the messenger's error for the first part that failed.
pub async fn send_split(
    messenger: &dyn Messenger,
    number: &str,
    body: &str,
) -> CapabilityResult<usize> {
    let parts = split_message(body);
    let total = parts.len();
    for (index, part) in parts.iter().enumerate() {
        messenger.send_text(number, part).await?;
        if total > 1 {
            info!(part = index + 1, total, "sent multipart SMS segment");
        }
    }
    Ok(total)
}

/// Location SMS: the configured prefix followed by a maps link.
#[must_use]
pub fn location_message(prefix: &str, location: &Location) -> String {
    format!("{prefix}{}", location.maps_url())
}

/// Follow-up SMS carrying the recording link.
#[must_use]
pub fn audio_link_message(prefix: &str, url: &str) -> String {
    format!("{prefix}{url}")
}

/// Text of the full-screen alert for a detected phrase.
#[must_use]
pub fn alert_message(phrase: &str) -> String {
    format!("'{}' detected! Contacting guardian...", phrase.to_uppercase())
}
