//! Notification field parsing and conversation-type classification
//!
//! The source app emits loosely-structured, locale- and version-dependent
//! text fields. This module reconstructs a clean ordered list of per-sender
//! messages from a ticker line, a summary line and the optional structured
//! unread-conversation payload, and infers the conversation type along the
//! way.
//!
//! Known field shapes, by conversation kind and unread count:
//!
//! ```text
//! Direct message   1 unread  Ticker: "Oasis: Hello"          Title: "Oasis"  Summary: "Hello"                  Payload: "Hello"
//! Direct message  >1 unread  Ticker: "Oasis: [Link] WTF"     Title: "Oasis"  Summary: "[2]Oasis: [Link] WTF"
//! Service message  1 unread  Ticker: "FedEx: [Link] Status"  Title: "FedEx"  Summary: "[Link] Status"          Payload: "[Link] Status"
//! Service message >1 unread  Ticker: "FedEx: Delivered"      Title: "FedEx"  Summary: "[2]FedEx: Delivered"    Payload: "[Link] Delivered"
//! Group chat       1 unread  Ticker: "Nick: Hello"           Title: "Group"  Summary: "Nick: Hello"            Payload: "Nick: Hello"
//! Group chat      >1 unread  Ticker: "Nick: [Link] Mm"       Title: "Group"  Summary: "[2]Nick: [Link] Mm"     Payload: "Nick: [Link] Mm"
//! ```
//!
//! Every ambiguous branch degrades to a best-effort result; nothing in this
//! module returns an error. Wrong guesses merely produce a less useful
//! notification.

use crate::conversation::{Conversation, ConversationType};
use crate::emoji;
use crate::messaging::Message;
use tracing::{debug, error};

/// Separator between a sender name and the message text
pub const SENDER_MESSAGE_SEPARATOR: &str = ": ";

/// Upper bound kept for unread-count bookkeeping
const MAX_UNREAD_COUNT: u32 = 0xFFFF;

/// Sender attribution of a single parsed line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineSender {
    /// No sender could be extracted; the conversation-level identity applies
    Unknown,
    /// Sent by the device's own user
    SelfUser,
    /// Sent by the named peer
    Name(String),
}

/// One reconstructed message line, before identity resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub sender: LineSender,
    pub text: String,
    pub timestamp: i64,
}

impl ParsedMessage {
    /// Resolve the sender identity against the conversation and produce the
    /// final message. Emoji markers in the surfaced text are translated
    /// here, so upstream equality checks always compare raw text.
    pub fn into_message(self, conversation: &mut Conversation) -> Message {
        let person = match &self.sender {
            LineSender::SelfUser => None,
            LineSender::Name(name) if conversation.is_group_chat() => {
                conversation.group_participant(name, name)
            }
            LineSender::Unknown if conversation.is_group_chat() => None,
            _ => Some(conversation.sender()),
        };
        Message {
            text: emoji::translate(&self.text).into_owned(),
            timestamp: self.timestamp,
            person,
        }
    }
}

/// Reconstruct the ordered message list for a conversation
///
/// With no usable structured payload, the single line derived from the
/// basic fields is returned. Otherwise every payload line is parsed, with
/// the basic-fields line used to locate the end of peer-sent lines: for 1:1
/// conversations the payload sometimes carries self-sent follow-ups the
/// basic fields do not reflect, so every line after the last one matching
/// the basic-fields text is attributed to the device user.
pub fn build_messages(conversation: &mut Conversation) -> Vec<Message> {
    let payload_messages: Option<Vec<String>> = conversation
        .payload
        .as_ref()
        .map(|payload| payload.messages.clone())
        .filter(|messages| !messages.is_empty()); // Sometimes payload messages are empty, for unknown cause.

    let basic = build_from_basic_fields(conversation);
    let Some(lines) = payload_messages else {
        return vec![basic.into_message(conversation)];
    };

    let mut end_of_peers = None;
    if !conversation.is_group_chat() {
        // Find the actual end line matching the basic fields, in case extra
        // lines were sent by self.
        end_of_peers = lines.iter().rposition(|line| *line == basic.text);
    }

    let mut messages = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        let from_self = end_of_peers.is_some_and(|end| index > end);
        let parsed = build_from_payload_line(conversation, line, from_self);
        messages.push(parsed.into_message(conversation));
    }
    messages
}

/// Derive a single message line from ticker + summary
pub(crate) fn build_from_basic_fields(conversation: &mut Conversation) -> ParsedMessage {
    let ticker_raw = conversation.ticker.clone().unwrap_or_default();
    let ticker = ticker_raw.trim_end_matches(' ');

    let mut sender: Option<&str> = None;
    let mut text: &str = ticker;
    if let Some(pos) = find_separator(ticker) {
        sender = Some(&ticker[..pos]);
        text = &ticker[pos + SENDER_MESSAGE_SEPARATOR.len()..];
    }

    let summary = conversation.summary.clone().unwrap_or_default();
    let mut content_without_prefix: &str = &summary;
    let mut unread_count = 0;
    if summary.starts_with('[') && summary.chars().count() > 3 {
        if let Some(close) = summary[1..].find(']').map(|p| p + 1) {
            unread_count = parse_prefix_as_unread_count(&summary[1..close]);
            if unread_count > 0 {
                conversation.unread_count = unread_count;
                content_without_prefix = &summary[close + 1..];
            } else if summary[close + 1..] == *text {
                // Only bot messages omit the text prefix (e.g. "[Link]")
                conversation.set_type(ConversationType::BotMessage);
            }
        }
    }

    if sender.is_none() {
        // No sender in ticker; trust the sender in the summary text.
        if let Some(pos) = find_separator(content_without_prefix) {
            sender = Some(&content_without_prefix[..pos]);
            text = &content_without_prefix[pos + SENDER_MESSAGE_SEPARATOR.len()..];
        } else {
            text = content_without_prefix;
        }
    } else if !starts_with_pair(content_without_prefix, sender.unwrap_or_default(), SENDER_MESSAGE_SEPARATOR) {
        // The ticker-derived sender should reappear at the start of the summary.
        if unread_count > 0 {
            let head: String = summary.chars().take(10).collect();
            error!("sender mismatch: {:?} in ticker, summary starts {:?}", sender.unwrap_or_default(), head);
        }
        if starts_with_pair(ticker, sender.unwrap_or_default(), SENDER_MESSAGE_SEPARATOR) {
            // Normal case for a single unread message
            return ParsedMessage {
                sender: sender.map_or(LineSender::Unknown, |s| LineSender::Name(s.to_string())),
                text: content_without_prefix.to_string(),
                timestamp: conversation.timestamp,
            };
        }
    }

    ParsedMessage {
        sender: sender.map_or(LineSender::Unknown, |s| LineSender::Name(s.to_string())),
        text: text.to_string(),
        timestamp: conversation.timestamp,
    }
}

/// Parse an unread-count prefix of the form `n` or `n` plus one unit
/// character (a localized "messages" suffix, e.g. `条` or `則`)
///
/// Returns 0 when the prefix is not an unread count. A parse of 1 is
/// rejected too: the source app never prefixes a single unread message, so
/// a `[1]`-like bracket is ordinary text. Abnormally large counts are
/// clamped for internal bookkeeping.
pub(crate) fn parse_prefix_as_unread_count(prefix: &str) -> u32 {
    if prefix.is_empty() {
        return 0;
    }
    let mut chars = prefix.chars();
    let digits = match chars.next_back() {
        Some(last) if prefix.chars().count() > 1 && !last.is_ascii_digit() => chars.as_str(),
        _ => prefix,
    };
    match digits.parse::<u32>() {
        Ok(count) if count >= 2 => count.min(MAX_UNREAD_COUNT),
        Ok(_) => 0,
        Err(_) => {
            // Probably just an emoji marker like "[Cry]"
            debug!("not an unread count: {prefix:?}");
            0
        }
    }
}

/// Infer the conversation type from the latest fields
///
/// The strongest signal is a structured payload carrying lines from more
/// than one sender (group chat). Failing that, the position of the ticker
/// text inside the summary separates direct/bot conversations (summary
/// starts with the ticker, modulo a short count prefix) from group chats
/// (summary is prefixed with the participant nick, pushing the ticker text
/// later). The trailing branches are acknowledged guesses; see
/// [`TypePolicy`](crate::TypePolicy) for overriding them.
pub fn guess_conversation_type(conversation: &Conversation) -> ConversationType {
    let payload_messages: &[String] = conversation
        .payload
        .as_ref()
        .map(|payload| payload.messages.as_slice())
        .unwrap_or(&[]);
    let last_message = payload_messages.last().map(String::as_str);

    if payload_messages.len() > 1 {
        // Payload lines with multiple senders are strong evidence for a group chat.
        let mut first_sender: Option<&str> = None;
        for line in payload_messages {
            let Some((line_sender, _)) = line.split_once(':') else { continue };
            match first_sender {
                None => first_sender = Some(line_sender),
                Some(seen) if seen != line_sender => return ConversationType::GroupChat,
                Some(_) => {}
            }
        }
    }

    let Some(content) = conversation.summary.as_deref() else {
        return ConversationType::Unknown;
    };
    // The ticker (modulo trailing spaces) always starts with the sender:
    // same as the title for direct messages, but not for group chats.
    let ticker = conversation
        .ticker
        .as_deref()
        .unwrap_or_default()
        .trim_matches(|c: char| c <= ' ');
    let title = conversation.title.as_deref().unwrap_or_default();

    // The summary includes the sender for group and service messages, but
    // not for direct messages. Seek the ticker text inside it.
    let pos = content.find(ticker);
    let near_start = pos.is_some_and(|p| content[..p].chars().count() <= 6); // Up to "[999x]" of count prefix
    if let (Some(pos), true) = (pos, near_start) {
        let content_without_count = if pos > 0 && content.starts_with('[') { &content[pos..] } else { content };
        if starts_with_pair(content_without_count, title, SENDER_MESSAGE_SEPARATOR) {
            // The title of a group chat is the group name, never the sender.
            let text = &content_without_count[title.len() + SENDER_MESSAGE_SEPARATOR.len()..];
            if starts_with_bracketed_prefix_and_one_space(last_message, text) {
                // Ticker "Bot: Text", summary "[2]Bot: Text", payload "[Link] Text"
                return ConversationType::BotMessage;
            }
            if is_bracketed_prefix_only(last_message) {
                return ConversationType::BotMessage;
            }
            // Most probably a direct message with more than one unread
            return ConversationType::DirectMessage;
        }
        return ConversationType::GroupChat;
    }
    if ticker.contains(content) {
        if starts_with_bracketed_prefix_and_one_space(last_message, content) {
            return ConversationType::BotMessage;
        }
        // Indistinguishable: a direct message with one unread, or a service
        // text message without a link
        return ConversationType::Unknown;
    }
    // Most probably a service message with a link
    ConversationType::BotMessage
}

/// `[..] needle` — the payload line carries a bracketed link annotation
/// followed by one space before the known text
fn starts_with_bracketed_prefix_and_one_space(line: Option<&str>, needle: &str) -> bool {
    let Some(line) = line else { return false };
    let Some(start) = line.find(needle) else { return false };
    let bytes = line.as_bytes();
    start > 3 && bytes[0] == b'[' && bytes[start - 1] == b' ' && bytes[start - 2] == b']'
}

/// The payload line is nothing but a short bracketed annotation
fn is_bracketed_prefix_only(line: Option<&str>) -> bool {
    let Some(line) = line else { return false };
    let length = line.chars().count();
    (3..=4).contains(&length) && line.starts_with('[') && line.ends_with(']')
}

/// Parse one structured-payload line
pub(crate) fn build_from_payload_line(conversation: &Conversation, line: &str, from_self: bool) -> ParsedMessage {
    let mut text: &str = line;
    let mut sender = if from_self { LineSender::SelfUser } else { LineSender::Unknown };
    if !from_self {
        if let Some(pos) = find_separator(line) {
            let name = &line[..pos];
            let title_as_sender = conversation.title.as_deref() == Some(name);
            if conversation.is_group_chat() || title_as_sender {
                text = &line[pos + SENDER_MESSAGE_SEPARATOR.len()..];
                if conversation.is_group_chat() && title_as_sender {
                    // The app mistakenly uses the group-chat title as the
                    // sender of self-sent messages.
                    sender = LineSender::SelfUser;
                } else {
                    sender = LineSender::Name(name.to_string());
                }
            }
            // Otherwise the prefix is not really a sender name; keep the
            // whole line as text.
        }
    }
    ParsedMessage { sender, text: text.to_string(), timestamp: 0 }
}

/// Position of the first `": "` separator, provided a sender precedes it
fn find_separator(text: &str) -> Option<usize> {
    text.find(SENDER_MESSAGE_SEPARATOR).filter(|&pos| pos > 0)
}

/// `text` starts with `needle1` immediately followed by `needle2`, with at
/// least one character after them
fn starts_with_pair(text: &str, needle1: &str, needle2: &str) -> bool {
    text.len() > needle1.len() + needle2.len()
        && text.starts_with(needle1)
        && text[needle1.len()..].starts_with(needle2)
}
