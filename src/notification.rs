//! Notification data model
//!
//! This module models the notification shape exchanged with the host
//! framework: the mutable notification being evolved, its extras map, the
//! structured unread-conversation payload attached by the source app for
//! automotive integration (repurposed here as a richer data source), and
//! the callback action handles used for reply and mark-read plumbing.
//!
//! ## Notification Structure
//!
//! Each evolving notification carries:
//! - `title`: conversation display name
//! - `text`: full unread-content line (summary)
//! - `ticker`: one-line transient announcement
//! - `extras`: JSON dictionary the structured messaging output is flattened
//!   into
//! - optional unread-conversation payload with raw message lines and
//!   reply/read callback handles
//!
//! Callback handles are fire-and-forget channel senders: a send on a handle
//! whose receiver is gone fails with
//! [`DecoratorError::CallbackCancelled`](crate::DecoratorError::CallbackCancelled)
//! and the operation is abandoned, never retried.

use crate::{DecoratorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Notification flag: this is the summary of a notification group
pub const FLAG_GROUP_SUMMARY: u32 = 1 << 0;
/// Notification flag: ongoing event (e.g. an active voice call)
pub const FLAG_ONGOING_EVENT: u32 = 1 << 1;
/// Notification flag: posted by a foreground service
pub const FLAG_FOREGROUND_SERVICE: u32 = 1 << 2;
/// Notification flag: not bridged to companion devices
pub const FLAG_LOCAL_ONLY: u32 = 1 << 3;
/// Notification flag: alert only for the first delivery of this key
pub const FLAG_ONLY_ALERT_ONCE: u32 = 1 << 4;

/// Extras key: sub-text header shown on group summaries
pub const EXTRA_SUB_TEXT: &str = "subText";
/// Extras key: remote-input history (most recent first)
pub const EXTRA_REMOTE_INPUT_HISTORY: &str = "remoteInputHistory";
/// Extras key: display name of the device user
pub const EXTRA_SELF_DISPLAY_NAME: &str = "selfDisplayName";
/// Extras key: conversation title of the messaging style
pub const EXTRA_CONVERSATION_TITLE: &str = "conversationTitle";
/// Extras key: flattened message list
pub const EXTRA_MESSAGES: &str = "messages";
/// Extras key: whether the conversation is a group conversation
pub const EXTRA_IS_GROUP_CONVERSATION: &str = "isGroupConversation";
/// Extras key: expanded text of the diagnostic dump
pub const EXTRA_BIG_TEXT: &str = "bigText";
/// Extras key: presentation template marker
pub const EXTRA_TEMPLATE: &str = "template";
/// Extras key: always show the timestamp
pub const EXTRA_SHOW_WHEN: &str = "showWhen";
/// Template marker for the structured messaging presentation
pub const TEMPLATE_MESSAGING: &str = "messaging";

/// JSON dictionary of ancillary notification data
pub type Extras = HashMap<String, Value>;

/// Opaque user-profile identifier (work profile vs. personal, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserProfile(pub i32);

/// Reference to an avatar/icon resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconRef(pub String);

/// Invocation payload delivered through an [`ActionHandle`]
///
/// Mirrors what the original callback receives: an optional explicit target
/// package, a wake-even-if-stopped marker, the typed reply text keyed by
/// the remote-input result key, and free-form extras.
#[derive(Debug, Clone, Default)]
pub struct ActionInvocation {
    /// Explicit target package for the dispatch
    pub package: Option<String>,
    /// Deliver even if the target app is stopped or background-restricted
    pub wake_stopped: bool,
    /// Typed reply text, keyed by the remote-input result key
    pub input: Option<(String, String)>,
    /// Additional payload
    pub extras: Extras,
}

/// Fire-and-forget callback handle provided by the host or the source app
///
/// Sends never block notification processing. A send on a handle whose
/// receiver side is gone returns [`DecoratorError::CallbackCancelled`];
/// callers log a warning and abandon the operation.
///
/// # Examples
///
/// ```rust
/// use wechat_decorator::notification::{ActionHandle, ActionInvocation};
///
/// let (handle, mut rx) = ActionHandle::channel("com.tencent.mm");
/// handle.send(ActionInvocation::default()).unwrap();
/// assert!(rx.try_recv().is_ok());
///
/// drop(rx);
/// assert!(handle.send(ActionInvocation::default()).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ActionHandle {
    creator_package: String,
    tx: mpsc::UnboundedSender<ActionInvocation>,
}

impl ActionHandle {
    /// Create a handle plus the receiver end the host would service
    pub fn channel(creator_package: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ActionInvocation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { creator_package: creator_package.into(), tx },
            rx,
        )
    }

    /// Package that created this callback
    pub fn creator_package(&self) -> &str {
        &self.creator_package
    }

    /// Dispatch an invocation through the callback
    ///
    /// # Errors
    ///
    /// Returns [`DecoratorError::CallbackCancelled`] if the receiver is gone.
    pub fn send(&self, invocation: ActionInvocation) -> Result<()> {
        self.tx
            .send(invocation)
            .map_err(|_| DecoratorError::CallbackCancelled(self.creator_package.clone()))
    }

    /// Build the invocation template that reaches the target app even when
    /// it is stopped or background-restricted
    pub fn wake_up_invocation(&self) -> ActionInvocation {
        ActionInvocation {
            package: Some(self.creator_package.clone()),
            wake_stopped: true,
            ..ActionInvocation::default()
        }
    }
}

/// Remote-input description attached to a reply action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInputSpec {
    /// Key under which the typed text is delivered back
    pub result_key: String,
    /// Hint label shown in the input field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Pre-canned reply choices
    #[serde(default)]
    pub choices: Vec<String>,
    /// Whether free-form text input is allowed
    pub allow_free_form: bool,
}

/// Wire contract of the proxied reply
///
/// The decorator replaces the original reply action with a locally
/// intercepted one; on user input the host hands this record back to
/// [`WeChatDecorator::on_reply`](crate::WeChatDecorator::on_reply), which
/// forwards the text to the original callback, updates the input history
/// and triggers the read acknowledgment.
#[derive(Debug, Clone)]
pub struct ReplyProxy {
    /// Evolved notification key (the URI scheme-specific part)
    pub key: String,
    /// Pre-evolution key of the same notification
    pub original_key: Option<String>,
    /// Numeric id of the conversation being replied to
    pub conversation_id: i32,
    /// Profile the conversation belongs to
    pub profile: UserProfile,
    /// The original reply callback of the source app
    pub reply_action: ActionHandle,
    /// Remote-input result key of the original action
    pub result_key: String,
    /// Input history captured at proxy time (most recent first)
    pub input_history: Vec<String>,
}

/// A reply action written back into the evolved notification
#[derive(Debug, Clone)]
pub struct ReplyAction {
    /// User-visible action title
    pub title: String,
    /// Remote-input description (label, choices)
    pub remote_input: RemoteInputSpec,
    /// Proxy record handed back on user input
    pub proxy: ReplyProxy,
}

/// Structured unread-conversation payload ("car extender")
///
/// Attached by the source app to the latest notification only; replaced
/// wholesale on each update, never merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadConversation {
    /// Raw unread message lines, oldest first
    pub messages: Vec<String>,
    /// At most one participant identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    /// Timestamp of the latest message in milliseconds
    pub latest_timestamp: i64,
    /// Reply callback of the source app
    #[serde(skip)]
    pub reply_action: Option<ActionHandle>,
    /// Read-acknowledgment callback of the source app
    #[serde(skip)]
    pub read_action: Option<ActionHandle>,
    /// Remote-input description of the original reply action
    #[serde(skip)]
    pub remote_input: Option<RemoteInputSpec>,
}

/// The notification body being evolved
#[derive(Debug, Clone, Default)]
pub struct Notification {
    /// Conversation display name
    pub title: Option<String>,
    /// Full unread-content line
    pub text: Option<String>,
    /// One-line transient announcement
    pub ticker: Option<String>,
    /// Channel the notification is posted on
    pub channel_id: Option<String>,
    /// Grouping key
    pub group: Option<String>,
    /// Timestamp of the latest message in milliseconds
    pub when: i64,
    /// Small-icon tint color (ARGB)
    pub color: u32,
    /// Unread count badge
    pub number: u32,
    /// Auto-cancel timeout in milliseconds
    pub timeout_after: Option<i64>,
    /// Notification flags (`FLAG_*`)
    pub flags: u32,
    /// Conversation avatar
    pub large_icon: Option<IconRef>,
    /// Source-app icon
    pub small_icon: Option<IconRef>,
    /// Shortcut this notification is associated with
    pub shortcut_id: Option<String>,
    /// Locus this notification is associated with
    pub locus_id: Option<String>,
    /// Ancillary data; the structured messaging output lands here
    pub extras: Extras,
    /// Structured unread-conversation payload, if attached
    pub unread_conversation: Option<UnreadConversation>,
    /// Actions written back by the decorator
    pub actions: Vec<ReplyAction>,
}

impl Notification {
    /// Check a notification flag
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Set a notification flag
    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    /// Clear a notification flag
    pub fn clear_flag(&mut self, flag: u32) {
        self.flags &= !flag;
    }

    /// Remote-input history stored in the extras, most recent first
    pub fn input_history(&self) -> Vec<String> {
        match self.extras.get(EXTRA_REMOTE_INPUT_HISTORY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A status-bar entry being evolved by the host, or retained in its archive
///
/// The numeric id may be rewritten by the decorator when the source app is
/// known to reuse ids across conversations; the original id/key always
/// refer to the entry as delivered by the source app.
#[derive(Debug, Clone)]
pub struct EvolvingNotification {
    /// Evolved notification key
    pub key: String,
    /// Key as delivered by the source app
    pub original_key: String,
    /// Current (possibly rewritten) notification id
    pub id: i32,
    /// Notification id as delivered by the source app
    pub original_id: i32,
    /// Posting package
    pub package: String,
    /// Profile the notification was posted in
    pub profile: UserProfile,
    /// The notification body
    pub notification: Notification,
}

impl EvolvingNotification {
    /// Rewrite the notification id (used when source-app ids are not
    /// distinct per conversation)
    pub fn set_id(&mut self, id: i32) {
        self.id = id;
    }
}

/// Current UNIX timestamp in milliseconds
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
