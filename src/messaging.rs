//! Structured messaging presentation
//!
//! Builds the platform's structured messaging representation (ordered
//! message list with sender identity and timestamps) from a conversation's
//! parsed state, and flattens it back into the notification's extension
//! fields.
//!
//! Two build paths exist:
//! - **Live**: from the structured unread-conversation payload of the
//!   current notification. Also wires the proxied reply action and records
//!   the read callback for later mark-read.
//! - **Archive**: when no payload is present, historical lines are
//!   reconstructed by re-parsing the most recent superseded notifications
//!   of the same conversation.
//!
//! Both paths produce `None` — not an error — when there is nothing to
//! show; callers must then leave the notification as delivered.

use crate::conversation::{Conversation, ConversationRegistry, Person};
use crate::emoji;
use crate::host::HostController;
use crate::notification::{
    ActionHandle, EvolvingNotification, Extras, Notification, RemoteInputSpec, ReplyAction,
    ReplyProxy, EXTRA_BIG_TEXT, EXTRA_CONVERSATION_TITLE, EXTRA_IS_GROUP_CONVERSATION,
    EXTRA_MESSAGES, EXTRA_REMOTE_INPUT_HISTORY, EXTRA_SELF_DISPLAY_NAME, EXTRA_SUB_TEXT,
};
use crate::parse::{self, SENDER_MESSAGE_SEPARATOR};
use crate::smart_reply;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Cap on historical lines reconstructed from the archive
const MAX_NUM_HISTORICAL_LINES: usize = 10;

/// User-visible title of the proxied reply action
const REPLY_ACTION_TITLE: &str = "Reply";

/// Display name used for the device user when none is configured
const SELF_DISPLAY_NAME: &str = "Me";

/// One entry of the structured message list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message text, emoji-translated
    pub text: String,
    /// Message time in milliseconds (0 when unknown)
    pub timestamp: i64,
    /// Sender identity; `None` means the device user
    pub person: Option<Person>,
}

/// The structured messaging representation written back to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingStyle {
    /// Identity of the device user
    pub user: Person,
    /// Ordered message list, oldest first
    pub messages: Vec<Message>,
    /// Conversation title (group chats and the service-message header)
    pub conversation_title: Option<String>,
    /// Whether this renders as a group conversation
    pub is_group_conversation: bool,
}

impl MessagingStyle {
    pub fn new(user: Person) -> Self {
        MessagingStyle { user, messages: Vec::new(), conversation_title: None, is_group_conversation: false }
    }
}

/// Builds [`MessagingStyle`] values and owns the reply/mark-read plumbing
pub struct MessagingBuilder {
    user_self: Person,
    /// Read callbacks of live payloads, keyed by evolved notification key
    mark_read_actions: HashMap<String, ActionHandle>,
}

impl Default for MessagingBuilder {
    fn default() -> Self {
        MessagingBuilder::new(Person {
            name: SELF_DISPLAY_NAME.to_string(),
            key: None,
            uri: None,
            bot: false,
            icon: None,
        })
    }
}

impl MessagingBuilder {
    /// Create a builder with the given self identity
    pub fn new(user_self: Person) -> Self {
        MessagingBuilder { user_self, mark_read_actions: HashMap::new() }
    }

    /// Build the messaging style from the live structured payload
    ///
    /// Returns `None` when the conversation has no payload, signalling the
    /// caller to fall back to archive reconstruction.
    pub fn build_from_conversation(
        &mut self,
        conversation: &mut Conversation,
        evolving: &mut EvolvingNotification,
    ) -> Option<MessagingStyle> {
        let payload = conversation.payload.clone()?;

        if payload.latest_timestamp > 0 {
            conversation.timestamp = payload.latest_timestamp;
            evolving.notification.when = payload.latest_timestamp;
        }
        if let Some(read_action) = payload.read_action.clone() {
            // Mapped by the evolved key; consumed on mark-read.
            self.mark_read_actions.insert(evolving.key.clone(), read_action);
        }

        let messages = parse::build_messages(conversation);

        if let (Some(reply_action), Some(remote_input)) = (payload.reply_action.clone(), payload.remote_input.clone()) {
            if conversation.is_chat() {
                let choices = smart_reply::generate_choices(&messages)
                    .map(|set| set.iter().map(|s| s.to_string()).collect())
                    .unwrap_or_default();
                let label = if cfg!(debug_assertions) && conversation.id().is_some() {
                    conversation.id().map(str::to_string)
                } else {
                    // At most one participant is ever attached.
                    payload.participant.clone()
                };
                let proxy = ReplyProxy {
                    key: evolving.key.clone(),
                    original_key: Some(evolving.original_key.clone()),
                    conversation_id: conversation.nid,
                    profile: evolving.profile,
                    reply_action,
                    result_key: remote_input.result_key.clone(),
                    input_history: evolving.notification.input_history(),
                };
                evolving.notification.actions.push(ReplyAction {
                    title: REPLY_ACTION_TITLE.to_string(),
                    remote_input: RemoteInputSpec {
                        result_key: remote_input.result_key,
                        label,
                        choices,
                        allow_free_form: true,
                    },
                    proxy,
                });
            }
        }

        let mut messaging = MessagingStyle::new(self.user_self.clone());
        messaging.messages = messages;
        Some(messaging)
    }

    /// Reconstruct historical lines from superseded notifications
    ///
    /// Entries whose title does not match belong to a different
    /// conversation that reused the notification id and are skipped, never
    /// merged. Returns `None` when no usable line was extracted.
    pub fn build_from_archive(
        &self,
        conversation: &mut Conversation,
        n: &mut Notification,
        title: &str,
        archive: &[EvolvingNotification],
    ) -> Option<MessagingStyle> {
        if archive.is_empty() {
            debug!("no archived notifications");
            return None;
        }

        // Keyed by timestamp: archive order is not guaranteed.
        let mut lines: BTreeMap<i64, (String, Option<String>)> = BTreeMap::new();
        let mut count = 0;
        let mut num_lines_with_colon = 0;
        let redundant_prefix = format!("{title}{SENDER_MESSAGE_SEPARATOR}");
        for each in archive {
            let each_n = &each.notification;
            let its_title = each_n
                .title
                .as_deref()
                .map(emoji::translate)
                .unwrap_or(std::borrow::Cow::Borrowed(""));
            if its_title != title {
                // Notification id reused by another conversation after removal.
                debug!("skipping unrelated conversation in archive: {its_title}");
                continue;
            }
            let Some(its_text) = each_n.text.as_deref() else {
                warn!("archived notification without text");
                continue;
            };
            match trim_and_extract_leading_counter(its_text) {
                Some((its_count, text_start)) => {
                    count = its_count;
                    let mut trimmed = &its_text[text_start..];
                    if let Some(rest) = trimmed.strip_prefix(&redundant_prefix) {
                        trimmed = rest;
                    } else if trimmed.find(SENDER_MESSAGE_SEPARATOR).is_some_and(|p| p > 0) {
                        num_lines_with_colon += 1;
                    }
                    lines.insert(each_n.when, (trimmed.to_string(), each_n.ticker.clone()));
                }
                None => {
                    count = 1;
                    if its_text.find(SENDER_MESSAGE_SEPARATOR).is_some_and(|p| p > 0) {
                        num_lines_with_colon += 1;
                    }
                    lines.insert(each_n.when, (its_text.to_string(), n.ticker.clone()));
                }
            }
        }
        n.number = count;
        if lines.is_empty() {
            warn!("no usable archived lines, expected {count}");
            return None;
        }
        // Per-line sender extraction only when every line carries one.
        let sender_inline = num_lines_with_colon == lines.len();
        while lines.len() > MAX_NUM_HISTORICAL_LINES {
            lines.pop_first();
        }
        let mut messaging = MessagingStyle::new(self.user_self.clone());
        for (when, (text, ticker)) in lines {
            messaging.messages.push(build_message(
                conversation,
                when,
                ticker.as_deref(),
                &text,
                if sender_inline { None } else { Some(title) },
            ));
        }
        info!("conversation rebuilt from archive");
        Some(messaging)
    }

    /// Forward a typed reply through the original callback
    ///
    /// On confirmed dispatch, prepends the text to the input history,
    /// recasts the notification with the updated history, and triggers the
    /// read acknowledgment. A cancelled callback is logged and abandoned.
    pub fn handle_reply(
        &mut self,
        host: &dyn HostController,
        registry: &ConversationRegistry,
        proxy: &ReplyProxy,
        input: &str,
    ) {
        let target_key = proxy.original_key.as_deref().unwrap_or(&proxy.key);
        if cfg!(debug_assertions) && input == "debug" {
            if let Some(conversation) = registry.get(proxy.profile, proxy.conversation_id) {
                let summary = format!("Type: {:?}", conversation.conversation_type());
                show_debug_notification(host, conversation, &summary);
            }
            host.recast_notification(target_key, None);
            return;
        }

        let mut invocation = proxy.reply_action.wake_up_invocation();
        invocation.input = Some((proxy.result_key.clone(), input.to_string()));
        match proxy.reply_action.send(invocation) {
            Ok(()) => {
                debug!("reply sent: {}", proxy.key);
                let mut history = Vec::with_capacity(proxy.input_history.len() + 1);
                history.push(input.to_string());
                history.extend(proxy.input_history.iter().cloned());
                let mut addition = Extras::new();
                addition.insert(EXTRA_REMOTE_INPUT_HISTORY.to_string(), json!(history));
                host.recast_notification(target_key, Some(addition));
                self.mark_read(&proxy.key);
            }
            Err(_) => warn!("reply action is already cancelled: {}", proxy.key),
        }
    }

    /// Trigger the read acknowledgment recorded for an evolved key
    pub fn mark_read(&mut self, key: &str) {
        let Some(action) = self.mark_read_actions.remove(key) else { return };
        let invocation = action.wake_up_invocation();
        if action.send(invocation).is_err() {
            warn!("mark-read action is already cancelled: {key}");
        }
    }

    #[cfg(test)]
    pub(crate) fn has_mark_read_action(&self, key: &str) -> bool {
        self.mark_read_actions.contains_key(key)
    }
}

/// Flatten the messaging style into the notification's extension fields
pub fn flat_into_extras(messaging: &MessagingStyle, extras: &mut Extras) {
    extras.insert(EXTRA_SELF_DISPLAY_NAME.to_string(), json!(messaging.user.name));
    if let Some(title) = &messaging.conversation_title {
        extras.insert(EXTRA_CONVERSATION_TITLE.to_string(), json!(title));
    }
    if !messaging.messages.is_empty() {
        let bundles: Vec<serde_json::Value> = messaging
            .messages
            .iter()
            .map(|message| {
                let mut bundle = json!({
                    "text": message.text,
                    "time": message.timestamp, // Included even when 0
                });
                if let Some(person) = &message.person {
                    bundle["sender"] = json!(person.name);
                }
                bundle
            })
            .collect();
        extras.insert(EXTRA_MESSAGES.to_string(), serde_json::Value::Array(bundles));
    }
    extras.insert(EXTRA_IS_GROUP_CONVERSATION.to_string(), json!(messaging.is_group_conversation));
}

/// Build one historical message line
///
/// Without an explicit sender the line's own `sender: ` prefix is used; a
/// prefix equal to the conversation title means the device user sent the
/// line. Group nicks appear in the ticker and content text while the
/// stable nick is used as the participant key.
fn build_message(
    conversation: &mut Conversation,
    when: i64,
    ticker: Option<&str>,
    text: &str,
    sender: Option<&str>,
) -> Message {
    let mut sender: Option<String> = sender.map(str::to_string);
    let mut actual_text: &str = text;
    if sender.is_none() {
        if let Some(extracted) = extract_sender_from_text(text) {
            actual_text = &text[extracted.len() + SENDER_MESSAGE_SEPARATOR.len()..];
            sender = if conversation.title.as_deref() == Some(extracted) {
                // The actual sender is the device user.
                None
            } else {
                Some(extracted.to_string())
            };
        }
    }
    let translated = emoji::translate(actual_text).into_owned();

    let person = if conversation.is_group_chat() {
        let ticker_sender = ticker.and_then(extract_sender_from_text);
        sender
            .as_deref()
            .and_then(|s| conversation.group_participant(s, ticker_sender.unwrap_or(s)))
    } else {
        Some(conversation.sender())
    };
    Message { text: translated, timestamp: when, person }
}

fn extract_sender_from_text(text: &str) -> Option<&str> {
    text.find(SENDER_MESSAGE_SEPARATOR)
        .filter(|&pos| pos > 0)
        .map(|pos| &text[..pos])
}

/// Extract the leading `[n]` / `[n条]`-style counter of an archived line
///
/// Returns the counter (clamped to 16 bits) and the byte offset of the
/// remaining text. A counter below 2 is not an unread count.
fn trim_and_extract_leading_counter(text: &str) -> Option<(u32, usize)> {
    if text.len() < 4 || !text.starts_with('[') {
        return None;
    }
    let close = text.as_bytes()[2..].iter().position(|&b| b == b']').map(|p| p + 2)?;
    let num = &text[1..close];
    let digits_end = num.bytes().position(|b| !b.is_ascii_digit()).unwrap_or(num.len());
    if digits_end == 0 {
        return None; // Not the expected unread count
    }
    match num[..digits_end].parse::<u32>() {
        Ok(count) if count >= 2 => Some((count.min(0xFFFF), close + 1)),
        Ok(_) => None,
        Err(_) => {
            debug!("not an archived counter: {text:?}");
            None
        }
    }
}

/// Raw diagnostic dump of a conversation's fields
///
/// Inert in production builds.
fn show_debug_notification(host: &dyn HostController, conversation: &Conversation, summary: &str) {
    if !cfg!(debug_assertions) {
        return;
    }
    let mut big_text = format!(
        "{}\nT:{}",
        conversation.summary.as_deref().unwrap_or_default(),
        conversation.ticker.as_deref().unwrap_or_default()
    );
    if let Some(payload) = &conversation.payload {
        for line in &payload.messages {
            big_text.push('\n');
            big_text.push_str(line);
        }
    }
    let mut n = Notification {
        title: conversation.id().map(str::to_string).or_else(|| conversation.title.clone()),
        text: conversation.ticker.clone(),
        ..Notification::default()
    };
    n.extras.insert(EXTRA_SUB_TEXT.to_string(), json!(summary));
    n.extras.insert(EXTRA_BIG_TEXT.to_string(), json!(big_text));
    host.post_notification(conversation.nid, n);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationType;
    use crate::notification::{ActionInvocation, UnreadConversation, UserProfile};
    use std::sync::Mutex;

    fn archived(title: &str, text: &str, when: i64) -> EvolvingNotification {
        EvolvingNotification {
            key: format!("0|com.tencent.mm|{when}"),
            original_key: format!("0|com.tencent.mm|{when}"),
            id: 1,
            original_id: 1,
            package: "com.tencent.mm".to_string(),
            profile: UserProfile(0),
            notification: Notification {
                title: Some(title.to_string()),
                text: Some(text.to_string()),
                when,
                ..Notification::default()
            },
        }
    }

    fn direct_conversation(title: &str) -> Conversation {
        let mut registry = ConversationRegistry::new();
        let conversation = registry.get_or_create(UserProfile(0), 1);
        conversation.title = Some(title.to_string());
        conversation.set_type(ConversationType::DirectMessage);
        std::mem::take(conversation)
    }

    #[derive(Default)]
    struct RecordingHost {
        recasts: Mutex<Vec<(String, Option<Extras>)>>,
    }

    impl HostController for RecordingHost {
        fn recast_notification(&self, key: &str, addition: Option<Extras>) {
            self.recasts.lock().unwrap().push((key.to_string(), addition));
        }
        fn archived_notifications(&self, _original_key: &str, _limit: usize) -> Vec<EvolvingNotification> {
            Vec::new()
        }
        fn create_notification_channels(
            &self,
            _package: &str,
            _profile: UserProfile,
            _channels: Vec<crate::host::NotificationChannel>,
        ) -> crate::Result<()> {
            Ok(())
        }
        fn notification_channel(
            &self,
            _package: &str,
            _profile: UserProfile,
            _channel_id: &str,
        ) -> Option<crate::host::NotificationChannel> {
            None
        }
        fn delete_notification_channel(&self, _package: &str, _profile: UserProfile, _channel_id: &str) {}
    }

    #[test]
    fn test_counter_extraction() {
        assert_eq!(trim_and_extract_leading_counter("[3]A: hi"), Some((3, 3)));
        assert_eq!(trim_and_extract_leading_counter("[12条]A: hi"), Some((12, 7)));
        assert_eq!(trim_and_extract_leading_counter("[1]A: hi"), None);
        assert_eq!(trim_and_extract_leading_counter("[Link] hi"), None);
        assert_eq!(trim_and_extract_leading_counter("A: hi"), None);
        assert_eq!(trim_and_extract_leading_counter("[2"), None);
        assert_eq!(trim_and_extract_leading_counter("[99999999]x"), Some((0xFFFF, 10)));
    }

    #[test]
    fn test_archive_reconstruction_strips_prefix_and_orders() {
        let mut conversation = direct_conversation("Oasis");
        let mut n = Notification::default();
        let archive = vec![
            archived("Oasis", "[3]Oasis: newer", 2_000),
            archived("Oasis", "older", 1_000),
        ];
        let builder = MessagingBuilder::default();
        let messaging = builder
            .build_from_archive(&mut conversation, &mut n, "Oasis", &archive)
            .unwrap();
        assert_eq!(messaging.messages.len(), 2);
        // Chronological order regardless of archive order
        assert_eq!(messaging.messages[0].text, "older");
        assert_eq!(messaging.messages[1].text, "newer");
        assert_eq!(n.number, 3);
    }

    #[test]
    fn test_archive_skips_mismatched_titles() {
        let mut conversation = direct_conversation("Oasis");
        let mut n = Notification::default();
        let archive = vec![archived("Somebody else", "[2]Somebody else: hi", 1_000)];
        let builder = MessagingBuilder::default();
        assert!(builder
            .build_from_archive(&mut conversation, &mut n, "Oasis", &archive)
            .is_none());
    }

    #[test]
    fn test_archive_empty_returns_none() {
        let mut conversation = direct_conversation("Oasis");
        let mut n = Notification::default();
        let builder = MessagingBuilder::default();
        assert!(builder.build_from_archive(&mut conversation, &mut n, "Oasis", &[]).is_none());
    }

    #[test]
    fn test_archive_sender_inline_extraction() {
        let mut conversation = direct_conversation("Group");
        conversation.set_type(ConversationType::GroupChat);
        let mut n = Notification::default();
        // Every line carries a sender prefix, so senders are taken per line.
        let archive = vec![
            archived("Group", "[2]Alice: hi", 1_000),
            archived("Group", "[3]Bob: yo", 2_000),
        ];
        let builder = MessagingBuilder::default();
        let messaging = builder
            .build_from_archive(&mut conversation, &mut n, "Group", &archive)
            .unwrap();
        let senders: Vec<_> = messaging
            .messages
            .iter()
            .map(|m| m.person.as_ref().unwrap().name.clone())
            .collect();
        assert_eq!(senders, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_live_build_without_payload_returns_none() {
        let mut conversation = direct_conversation("Oasis");
        let mut evolving = archived("Oasis", "Hello", 1_000);
        let mut builder = MessagingBuilder::default();
        assert!(builder.build_from_conversation(&mut conversation, &mut evolving).is_none());
    }

    #[test]
    fn test_live_build_wires_reply_and_mark_read() {
        let mut conversation = direct_conversation("Oasis");
        conversation.ticker = Some("Oasis: Hello?".to_string());
        conversation.summary = Some("Hello?".to_string());
        let (reply, _reply_rx) = ActionHandle::channel("com.tencent.mm");
        let (read, _read_rx) = ActionHandle::channel("com.tencent.mm");
        conversation.payload = Some(UnreadConversation {
            messages: vec!["Hello?".to_string()],
            participant: Some("Oasis".to_string()),
            latest_timestamp: 5_000,
            reply_action: Some(reply),
            read_action: Some(read),
            remote_input: Some(RemoteInputSpec {
                result_key: "reply_text".to_string(),
                label: None,
                choices: Vec::new(),
                allow_free_form: true,
            }),
        });

        let mut evolving = archived("Oasis", "Hello?", 1_000);
        let mut builder = MessagingBuilder::default();
        let messaging = builder.build_from_conversation(&mut conversation, &mut evolving).unwrap();

        assert_eq!(messaging.messages.len(), 1);
        assert_eq!(conversation.timestamp, 5_000);
        assert_eq!(evolving.notification.when, 5_000);
        assert!(builder.has_mark_read_action(&evolving.key));

        let action = &evolving.notification.actions[0];
        assert_eq!(action.title, "Reply");
        // The question mark in the last message produced reply choices.
        assert!(!action.remote_input.choices.is_empty());
        assert_eq!(action.proxy.result_key, "reply_text");
    }

    #[test]
    fn test_handle_reply_updates_history_and_marks_read() {
        let registry = ConversationRegistry::new();
        let host = RecordingHost::default();
        let (reply, mut reply_rx) = ActionHandle::channel("com.tencent.mm");
        let (read, mut read_rx) = ActionHandle::channel("com.tencent.mm");

        let mut builder = MessagingBuilder::default();
        builder.mark_read_actions.insert("key-1".to_string(), read);

        let proxy = ReplyProxy {
            key: "key-1".to_string(),
            original_key: Some("orig-1".to_string()),
            conversation_id: 1,
            profile: UserProfile(0),
            reply_action: reply,
            result_key: "reply_text".to_string(),
            input_history: vec!["earlier".to_string()],
        };
        builder.handle_reply(&host, &registry, &proxy, "on my way");

        let invocation: ActionInvocation = reply_rx.try_recv().unwrap();
        assert_eq!(invocation.package.as_deref(), Some("com.tencent.mm"));
        assert!(invocation.wake_stopped);
        assert_eq!(invocation.input, Some(("reply_text".to_string(), "on my way".to_string())));

        let recasts = host.recasts.lock().unwrap();
        let (key, addition) = &recasts[0];
        assert_eq!(key, "orig-1");
        let history = addition.as_ref().unwrap().get(EXTRA_REMOTE_INPUT_HISTORY).unwrap();
        assert_eq!(history[0], "on my way");
        assert_eq!(history[1], "earlier");

        // Mark-read fired and its action was consumed
        assert!(read_rx.try_recv().is_ok());
        assert!(!builder.has_mark_read_action("key-1"));
    }

    #[test]
    fn test_handle_reply_cancelled_action_is_abandoned() {
        let registry = ConversationRegistry::new();
        let host = RecordingHost::default();
        let (reply, reply_rx) = ActionHandle::channel("com.tencent.mm");
        drop(reply_rx);

        let mut builder = MessagingBuilder::default();
        let proxy = ReplyProxy {
            key: "key-1".to_string(),
            original_key: None,
            conversation_id: 1,
            profile: UserProfile(0),
            reply_action: reply,
            result_key: "reply_text".to_string(),
            input_history: Vec::new(),
        };
        builder.handle_reply(&host, &registry, &proxy, "hello");
        assert!(host.recasts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_flat_into_extras() {
        let mut messaging = MessagingStyle::new(Person {
            name: "Me".to_string(),
            key: None,
            uri: None,
            bot: false,
            icon: None,
        });
        messaging.is_group_conversation = true;
        messaging.conversation_title = Some("Friends".to_string());
        messaging.messages.push(Message {
            text: "hi".to_string(),
            timestamp: 7,
            person: Some(Person {
                name: "Alice".to_string(),
                key: None,
                uri: None,
                bot: false,
                icon: None,
            }),
        });
        messaging.messages.push(Message { text: "sent by me".to_string(), timestamp: 0, person: None });

        let mut extras = Extras::new();
        flat_into_extras(&messaging, &mut extras);
        assert_eq!(extras[EXTRA_SELF_DISPLAY_NAME], "Me");
        assert_eq!(extras[EXTRA_CONVERSATION_TITLE], "Friends");
        assert_eq!(extras[EXTRA_IS_GROUP_CONVERSATION], true);
        let messages = extras[EXTRA_MESSAGES].as_array().unwrap();
        assert_eq!(messages[0]["sender"], "Alice");
        assert_eq!(messages[1]["time"], 0);
        assert!(messages[1].get("sender").is_none());
    }
}
