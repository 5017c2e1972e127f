//! Plain-text transcript lines.

use parley_proto::{Message, MessageBody, UserId};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// `HH:MM` in the viewer's offset.
pub fn format_time(ts: OffsetDateTime, offset: UtcOffset) -> String {
    ts.to_offset(offset)
        .format(format_description!("[hour]:[minute]"))
        .unwrap_or_else(|_| "--:--".to_string())
}

pub fn summarize(body: &MessageBody) -> String {
    match body {
        MessageBody::Text { text } => text.clone(),
        MessageBody::File(file) if file.is_image() => format!("[image] {}", file.display_name()),
        MessageBody::File(file) => format!("[file] {}", file.display_name()),
        MessageBody::SharedPost(post) => {
            let author = post.author.as_deref().unwrap_or("unknown");
            match post.content.as_deref().filter(|c| !c.is_empty()) {
                Some(content) => format!("[post by {author}] {content}"),
                None => format!("[post by {author}]"),
            }
        }
        MessageBody::SharedProfile(profile) => {
            let name = profile
                .full_name
                .as_deref()
                .or(profile.nickname.as_deref())
                .or(profile.login.as_deref())
                .unwrap_or(&profile.profile_id);
            format!("[profile] {name}")
        }
        MessageBody::SharedMessage(shared) => match (&shared.text, &shared.file) {
            (Some(text), _) if !text.is_empty() => format!("[forwarded] {text}"),
            (_, Some(file)) => format!("[forwarded] [file] {}", file.display_name()),
            _ => "[forwarded]".to_string(),
        },
    }
}

/// `HH:MM sender: body`, with `you` for the viewer and a marker while the
/// server has not confirmed the message.
pub fn line(message: &Message, viewer: &UserId, offset: UtcOffset) -> String {
    let sender = if &message.sender_id == viewer {
        "you".to_string()
    } else {
        message
            .sender_nickname
            .clone()
            .unwrap_or_else(|| message.sender_id.to_string())
    };
    let mut line = format!(
        "{} {}: {}",
        format_time(message.created_at, offset),
        sender,
        summarize(&message.body)
    );
    if message.is_pending() {
        line.push_str(" (sending)");
    }
    line
}
