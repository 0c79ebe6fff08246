/// Message codec — converts between the typed `Message` and the flat
/// `MessageRecord` kept in a conversation's log.
use crate::error::{Result, StoreError};
use crate::message::{Message, MessageKind, MessageRecord};

/// Encode a typed message into its stored record.
///
/// Text stores the literal text; Photo/Video store the already-resolved
/// remote URL; Location stores `"<lat>,<lon>"`. Every other kind stores
/// an empty content string — the payload is dropped on write. `is_read`
/// is always written false.
pub fn encode(message: &Message) -> MessageRecord {
    let content = match &message.kind {
        MessageKind::Text(text) => text.clone(),
        MessageKind::Photo(url) | MessageKind::Video(url) => url.clone(),
        MessageKind::Location {
            latitude,
            longitude,
        } => format!("{},{}", latitude, longitude),
        _ => String::new(),
    };

    MessageRecord {
        id: message.id.clone(),
        kind: message.kind.tag().to_string(),
        content,
        date: message.sent_at.clone(),
        sender: message.sender.clone(),
        is_read: false,
        name: message.sender_name.clone(),
    }
}

/// Decode a stored record back into a typed message.
///
/// Fails with `DecodeFailed` when a Photo/Video URL is empty or a
/// location coordinate does not parse; batch readers skip such records
/// instead of aborting. Unknown tags decode as plain text.
///
/// Location note: encode writes `"lat,lon"` but decode reads index 0 as
/// longitude and index 1 as latitude, so a round trip swaps the pair.
/// This mirrors the deployed wire behavior and is pinned by test; do
/// not reorder without a coordinated data migration.
pub fn decode(record: &MessageRecord) -> Result<Message> {
    let kind = match record.kind.as_str() {
        "Photo" => MessageKind::Photo(parse_url(record)?),
        "Video" => MessageKind::Video(parse_url(record)?),
        "location" => {
            let mut parts = record.content.split(',');
            let longitude = parse_coordinate(parts.next(), record)?;
            let latitude = parse_coordinate(parts.next(), record)?;
            MessageKind::Location {
                latitude,
                longitude,
            }
        }
        _ => MessageKind::Text(record.content.clone()),
    };

    Ok(Message {
        id: record.id.clone(),
        sender: record.sender.clone(),
        sender_name: record.name.clone(),
        sent_at: record.date.clone(),
        kind,
    })
}

fn parse_url(record: &MessageRecord) -> Result<String> {
    if record.content.is_empty() {
        return Err(StoreError::DecodeFailed(format!(
            "message {}: empty media URL",
            record.id
        )));
    }
    Ok(record.content.clone())
}

fn parse_coordinate(part: Option<&str>, record: &MessageRecord) -> Result<f64> {
    part.and_then(|p| p.trim().parse::<f64>().ok())
        .ok_or_else(|| {
            StoreError::DecodeFailed(format!(
                "message {}: bad location content {:?}",
                record.id, record.content
            ))
        })
}
