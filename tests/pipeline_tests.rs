//! Decoration Pipeline Tests
//!
//! End-to-end tests through the decorator entry points:
//! - Live structured-payload decoration and archive fallback
//! - Conversation-type classification, heuristic and key-derived
//! - Conversation-id probe with its hard timeout
//! - Reply proxy round trip
//! - Channel and group-bucket assignment

use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use wechat_decorator::notification::{
    EXTRA_IS_GROUP_CONVERSATION, EXTRA_MESSAGES, EXTRA_REMOTE_INPUT_HISTORY, EXTRA_TEMPLATE,
    FLAG_LOCAL_ONLY, TEMPLATE_MESSAGING,
};
use wechat_decorator::{
    ActionHandle, ConversationType, Decorator, EvolvingNotification, Extras, HostController,
    Notification, NotificationChannel, RemoteInputSpec, Result, UnreadConversation, UserProfile,
    WeChatDecorator, WECHAT_PACKAGE,
};

/// What the mock host answers to a conversation-id probe
enum ProbeBehavior {
    None,
    Answer(String),
    Silent,
}

struct MockHost {
    recasts: Mutex<Vec<(String, Option<Extras>)>>,
    archive: Mutex<HashMap<String, Vec<EvolvingNotification>>>,
    probe: Mutex<ProbeBehavior>,
    version_code: Option<i64>,
    /// Receivers kept alive so silent probes dangle instead of erroring
    pending_probes: Mutex<Vec<oneshot::Sender<String>>>,
}

impl Default for MockHost {
    fn default() -> Self {
        MockHost {
            recasts: Mutex::new(Vec::new()),
            archive: Mutex::new(HashMap::new()),
            probe: Mutex::new(ProbeBehavior::None),
            version_code: Some(2000),
            pending_probes: Mutex::new(Vec::new()),
        }
    }
}

impl HostController for MockHost {
    fn recast_notification(&self, key: &str, addition: Option<Extras>) {
        self.recasts.lock().unwrap().push((key.to_string(), addition));
    }

    fn archived_notifications(&self, original_key: &str, limit: usize) -> Vec<EvolvingNotification> {
        let mut entries = self
            .archive
            .lock()
            .unwrap()
            .get(original_key)
            .cloned()
            .unwrap_or_default();
        entries.truncate(limit);
        entries
    }

    fn create_notification_channels(
        &self,
        _package: &str,
        _profile: UserProfile,
        _channels: Vec<NotificationChannel>,
    ) -> Result<()> {
        Ok(())
    }

    fn notification_channel(
        &self,
        _package: &str,
        _profile: UserProfile,
        _channel_id: &str,
    ) -> Option<NotificationChannel> {
        None
    }

    fn delete_notification_channel(&self, _package: &str, _profile: UserProfile, _channel_id: &str) {}

    fn request_conversation_id(
        &self,
        _evolving: &EvolvingNotification,
    ) -> Option<oneshot::Receiver<String>> {
        match &*self.probe.lock().unwrap() {
            ProbeBehavior::None => None,
            ProbeBehavior::Answer(id) => {
                let (tx, rx) = oneshot::channel();
                tx.send(id.clone()).unwrap();
                Some(rx)
            }
            ProbeBehavior::Silent => {
                let (tx, rx) = oneshot::channel();
                self.pending_probes.lock().unwrap().push(tx);
                Some(rx)
            }
        }
    }

    fn package_version_code(&self, _package: &str) -> Option<i64> {
        self.version_code
    }
}

fn conversation_notification(ticker: &str, title: &str, summary: &str) -> Notification {
    Notification {
        title: Some(title.to_string()),
        text: Some(summary.to_string()),
        ticker: Some(ticker.to_string()),
        when: 1_700_000_000_000,
        ..Notification::default()
    }
}

fn evolving(id: i32, notification: Notification) -> EvolvingNotification {
    EvolvingNotification {
        key: format!("0|{WECHAT_PACKAGE}|{id}"),
        original_key: format!("0|{WECHAT_PACKAGE}|{id}"),
        id,
        original_id: id,
        package: WECHAT_PACKAGE.to_string(),
        profile: UserProfile(0),
        notification,
    }
}

fn with_payload(mut notification: Notification, lines: &[&str]) -> Notification {
    notification.unread_conversation = Some(UnreadConversation {
        messages: lines.iter().map(|l| l.to_string()).collect(),
        ..UnreadConversation::default()
    });
    notification
}

/// A synthetic direct message decorates into exactly one structured message
#[tokio::test]
async fn test_direct_message_round_trip() {
    let host = Arc::new(MockHost::default());
    let mut decorator = WeChatDecorator::new(host);

    let n = with_payload(conversation_notification("Oasis: Hello", "Oasis", "Hello"), &["Hello"]);
    let mut e = evolving(100, n);
    assert!(decorator.apply(&mut e).await);

    let extras = &e.notification.extras;
    assert_eq!(extras[EXTRA_TEMPLATE], TEMPLATE_MESSAGING);
    let messages = extras[EXTRA_MESSAGES].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["text"], "Hello");
    assert_eq!(messages[0]["sender"], "Oasis");
    assert_eq!(extras[EXTRA_IS_GROUP_CONVERSATION], false);
    assert_eq!(e.notification.group.as_deref(), Some("group.wechat"));
}

/// Distinct payload senders classify and render as a group conversation
#[tokio::test]
async fn test_group_chat_decoration() {
    let host = Arc::new(MockHost::default());
    let mut decorator = WeChatDecorator::new(host);

    let n = with_payload(
        conversation_notification("B: yo", "Friends", "B: yo"),
        &["A: hi", "B: yo"],
    );
    let mut e = evolving(101, n);
    assert!(decorator.apply(&mut e).await);

    let conversation = decorator.conversation(UserProfile(0), 101).unwrap();
    assert_eq!(conversation.conversation_type(), ConversationType::GroupChat);

    let extras = &e.notification.extras;
    assert_eq!(extras[EXTRA_IS_GROUP_CONVERSATION], true);
    assert_eq!(extras["conversationTitle"], "Friends");
    let messages = extras[EXTRA_MESSAGES].as_array().unwrap();
    assert_eq!(messages[0]["sender"], "A");
    assert_eq!(messages[1]["sender"], "B");
    // Group chats move to the dedicated channel
    assert_eq!(e.notification.channel_id.as_deref(), Some("group"));
    assert_eq!(e.notification.group.as_deref(), Some("group.wechat.group"));
}

/// Without a payload the archive is re-parsed into historical lines
#[tokio::test]
async fn test_archive_fallback() {
    let host = Arc::new(MockHost::default());

    let older = evolving(102, conversation_notification("Oasis: first", "Oasis", "first"));
    let mut newer = evolving(102, conversation_notification("Oasis: second", "Oasis", "[2]Oasis: second"));
    newer.notification.when += 1_000;
    host.archive
        .lock()
        .unwrap()
        .insert(older.original_key.clone(), vec![older.clone(), newer.clone()]);

    let mut decorator = WeChatDecorator::new(host);
    let mut e = evolving(102, conversation_notification("Oasis: second", "Oasis", "[2]Oasis: second"));
    e.notification.when += 1_000;
    assert!(decorator.apply(&mut e).await);

    let messages = e.notification.extras[EXTRA_MESSAGES].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["text"], "first");
    assert_eq!(messages[1]["text"], "second");
    assert_eq!(e.notification.number, 2);
}

/// With nothing usable in the archive, the notification is left unmodified
#[tokio::test]
async fn test_no_data_leaves_notification_alone() {
    let host = Arc::new(MockHost::default());
    let mut decorator = WeChatDecorator::new(host);

    let mut e = evolving(103, conversation_notification("Oasis: Hello", "Oasis", "Hello"));
    assert!(decorator.apply(&mut e).await);
    assert!(!e.notification.extras.contains_key(EXTRA_TEMPLATE));
    assert!(!e.notification.extras.contains_key(EXTRA_MESSAGES));
}

/// A resolved conversation key overrides the heuristic classification
#[tokio::test]
async fn test_probe_answer_drives_classification() {
    let host = Arc::new(MockHost::default());
    *host.probe.lock().unwrap() = ProbeBehavior::Answer("12345@chatroom".to_string());
    let mut decorator = WeChatDecorator::new(host);

    // Field shapes of a direct message, but the key says group chat
    let n = with_payload(conversation_notification("Oasis: Hello", "Oasis", "Hello"), &["Hello"]);
    let mut e = evolving(104, n);
    assert!(decorator.apply(&mut e).await);

    let conversation = decorator.conversation(UserProfile(0), 104).unwrap();
    assert_eq!(conversation.id(), Some("12345@chatroom"));
    assert_eq!(conversation.conversation_type(), ConversationType::GroupChat);
}

/// A probe that never answers times out and classification proceeds
#[tokio::test(start_paused = true)]
async fn test_probe_timeout_degrades_to_heuristics() {
    let host = Arc::new(MockHost::default());
    *host.probe.lock().unwrap() = ProbeBehavior::Silent;
    let mut decorator = WeChatDecorator::new(host);

    let n = with_payload(
        conversation_notification("B: yo", "Friends", "B: yo"),
        &["A: hi", "B: yo"],
    );
    let mut e = evolving(105, n);
    assert!(decorator.apply(&mut e).await);

    let conversation = decorator.conversation(UserProfile(0), 105).unwrap();
    assert_eq!(conversation.id(), None);
    assert_eq!(conversation.conversation_type(), ConversationType::GroupChat);
}

/// The proxied reply reaches the original callback and updates history
#[tokio::test]
async fn test_reply_proxy_round_trip() {
    let host = Arc::new(MockHost::default());
    let mut decorator = WeChatDecorator::new(host.clone());

    let (reply, mut reply_rx) = ActionHandle::channel(WECHAT_PACKAGE);
    let mut n = conversation_notification("Oasis: Hello?", "Oasis", "Hello?");
    n.unread_conversation = Some(UnreadConversation {
        messages: vec!["Hello?".to_string()],
        participant: Some("Oasis".to_string()),
        reply_action: Some(reply),
        remote_input: Some(RemoteInputSpec {
            result_key: "reply_text".to_string(),
            label: None,
            choices: Vec::new(),
            allow_free_form: true,
        }),
        ..UnreadConversation::default()
    });
    let mut e = evolving(106, n);
    assert!(decorator.apply(&mut e).await);

    let action = e.notification.actions.first().expect("reply action wired");
    // The question in the last message produced suggestions
    assert!(action.remote_input.choices.contains(&"OK".to_string()));

    decorator.on_reply(&action.proxy, "on my way");

    let invocation = reply_rx.try_recv().unwrap();
    assert_eq!(invocation.package.as_deref(), Some(WECHAT_PACKAGE));
    assert!(invocation.wake_stopped);
    assert_eq!(
        invocation.input,
        Some(("reply_text".to_string(), "on my way".to_string()))
    );

    let recasts = host.recasts.lock().unwrap();
    let (key, addition) = recasts.last().unwrap();
    assert_eq!(*key, e.original_key);
    let history = &addition.as_ref().unwrap()[EXTRA_REMOTE_INPUT_HISTORY];
    assert_eq!(history[0], "on my way");
}

/// The wear setting unlocks bridging to companion devices
#[tokio::test]
async fn test_wear_setting_clears_local_only() {
    let host = Arc::new(MockHost::default());
    let mut decorator = WeChatDecorator::new(host);

    let mut e = evolving(107, conversation_notification("Oasis: Hello", "Oasis", "Hello"));
    e.notification.set_flag(FLAG_LOCAL_ONLY);
    assert!(decorator.apply(&mut e).await);
    assert!(e.notification.has_flag(FLAG_LOCAL_ONLY));

    decorator.on_settings_changed("wear", true);
    let mut e = evolving(107, conversation_notification("Oasis: Hello", "Oasis", "Hello"));
    e.notification.set_flag(FLAG_LOCAL_ONLY);
    assert!(decorator.apply(&mut e).await);
    assert!(!e.notification.has_flag(FLAG_LOCAL_ONLY));
}

/// Reused notification ids are re-keyed by title so conversations stay apart
#[tokio::test]
async fn test_indistinct_ids_keyed_by_title() {
    let mut host = MockHost::default();
    host.version_code = Some(1000); // Before distinct per-conversation ids
    let host = Arc::new(host);
    let mut decorator = WeChatDecorator::new(host);

    let n = with_payload(conversation_notification("Oasis: Hello", "Oasis", "Hello"), &["Hello"]);
    let mut first = evolving(4097, n);
    assert!(decorator.apply(&mut first).await);

    let n = with_payload(conversation_notification("Aria: Hi", "Aria", "Hi"), &["Hi"]);
    let mut second = evolving(4097, n);
    assert!(decorator.apply(&mut second).await);

    // The shared rolling id was replaced by per-title ids
    assert_ne!(first.id, second.id);
    assert_ne!(first.id, 4097);
    let oasis = decorator.conversation(UserProfile(0), first.id).unwrap();
    assert_eq!(oasis.title.as_deref(), Some("Oasis"));
    let aria = decorator.conversation(UserProfile(0), second.id).unwrap();
    assert_eq!(aria.title.as_deref(), Some("Aria"));
}

/// Replied text from the input history is re-presented as self messages
#[tokio::test]
async fn test_input_history_appended_as_self_messages() {
    let host = Arc::new(MockHost::default());
    let mut decorator = WeChatDecorator::new(host);

    let mut n = with_payload(conversation_notification("Oasis: Hello", "Oasis", "Hello"), &["Hello"]);
    n.extras.insert(EXTRA_REMOTE_INPUT_HISTORY.to_string(), json!(["newest reply", "older reply"]));
    let mut e = evolving(108, n);
    assert!(decorator.apply(&mut e).await);

    let messages = e.notification.extras[EXTRA_MESSAGES].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    // Oldest replied text first, none carrying a sender (sent by self)
    assert_eq!(messages[1]["text"], "older reply");
    assert_eq!(messages[2]["text"], "newest reply");
    assert!(messages[1].get("sender").is_none());
    // The superseded extra is dropped after re-presenting
    assert!(!e.notification.extras.contains_key(EXTRA_REMOTE_INPUT_HISTORY));
}
