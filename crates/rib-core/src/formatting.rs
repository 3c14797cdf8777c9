//! IRC line formatting for feed items.

use crate::domain::{Item, OutboundMessage};

const BOLD: char = '\x02';
const COLOR: char = '\x03';

/// Short link host used for announced items.
pub const SHORTLINK_BASE: &str = "https://redd.it";

/// Byte budget for a whole formatted message.
///
/// An IRC line is at most 512 bytes including CRLF, and the server prepends
/// `:nick!user@host PRIVMSG <target> :` when relaying it. Keeping the text
/// well under the limit leaves room for that prefix, so the trailing link is
/// never cut off.
pub const MAX_TEXT_BYTES: usize = 380;

const ELLIPSIS: &str = "...";

/// Format an item as a single IRC line of at most [`MAX_TEXT_BYTES`] bytes.
///
/// `[reddit]` is red, `[/r/<sub>]` light blue, the whole line bold. Only the
/// title is shortened to fit.
pub fn format_item(item: &Item) -> String {
    let source = clean_line(&item.source_name);
    let render = |title: &str| {
        format!(
            "{BOLD}{COLOR}5[reddit]{COLOR} {COLOR}12[/r/{source}]{COLOR} {title}{BOLD} {SHORTLINK_BASE}/{}",
            item.raw_id,
        )
    };
    let budget = MAX_TEXT_BYTES.saturating_sub(render("").len());
    render(&truncate_bytes(&clean_line(&item.title), budget))
}

pub fn to_outbound(item: &Item) -> OutboundMessage {
    OutboundMessage::new(format_item(item))
}

/// Replace control characters with spaces and collapse whitespace runs.
///
/// A title carrying `\r\n` would otherwise smuggle a second protocol line.
fn clean_line(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cut `text` to at most `max_bytes`, on a char boundary, marking the cut.
fn truncate_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes.saturating_sub(ELLIPSIS.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{ELLIPSIS}", &text[..end])
}
