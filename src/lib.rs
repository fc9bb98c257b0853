//! WeChat Notification Decorator
//!
//! A decorator plugin for a notification-evolution host service: it
//! intercepts notifications of one messaging app and rebuilds them into the
//! platform's structured messaging presentation — a sender-attributed
//! message list with group-chat grouping, reply actions and conversation
//! shortcuts.
//!
//! The hard part is inference: the app only emits loosely-structured,
//! locale- and version-dependent text fields (a ticker, a title, a summary
//! line, and an optional structured unread-conversation payload). From
//! those, the decorator infers the conversation type, the true sender per
//! line and the unread count, and reconstructs a clean ordered message
//! list. Wrong guesses degrade the presentation; they never fail.

pub mod conversation;
pub mod decorator;
pub mod emoji;
pub mod host;
pub mod messaging;
pub mod notification;
pub mod parse;
pub mod settings;
pub mod smart_reply;

mod error;

pub use conversation::{Conversation, ConversationRegistry, ConversationType, Person};
pub use decorator::{DefaultTypePolicy, TypePolicy, WeChatDecorator, KEY_SERVICE_MESSAGE, WECHAT_PACKAGE};
pub use error::{DecoratorError, Result};
pub use host::{
    build_shortcut_id, ChannelImportance, Decorator, HostController, NotificationChannel,
    RemovalReason, ShortcutPublisher,
};
pub use messaging::{flat_into_extras, Message, MessagingBuilder, MessagingStyle};
pub use notification::{
    current_timestamp, ActionHandle, ActionInvocation, EvolvingNotification, Extras, IconRef,
    Notification, RemoteInputSpec, ReplyAction, ReplyProxy, UnreadConversation, UserProfile,
};
pub use parse::{build_messages, guess_conversation_type, LineSender, ParsedMessage};
pub use settings::DecoratorSettings;
