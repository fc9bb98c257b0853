//! WeChat notification decorator
//!
//! The orchestrator bound by the host: receives each incoming notification,
//! updates the conversation registry, runs the parser/classifier and the
//! messaging builder, and writes the structured result back into the
//! notification's fields.
//!
//! ## Pipeline
//!
//! ```text
//! apply() → registry (lookup/update) → conversation-id probe (≤ 100 ms)
//!         → type classification → messaging build (live → archive)
//!         → group/channel assignment → flatten into extras
//! ```
//!
//! Every step degrades rather than fails: an unclassifiable conversation
//! stays `Unknown`, a missing payload falls back to the archive, and when
//! nothing usable remains the notification is left as delivered.

use crate::conversation::{Conversation, ConversationRegistry, ConversationType};
use crate::host::{
    build_shortcut_id, ChannelImportance, Decorator, HostController, NotificationChannel,
    RemovalReason, ShortcutPublisher,
};
use crate::messaging::{self, Message, MessagingBuilder};
use crate::notification::{
    EvolvingNotification, ReplyProxy, UserProfile, EXTRA_REMOTE_INPUT_HISTORY, EXTRA_SHOW_WHEN,
    EXTRA_SUB_TEXT, EXTRA_TEMPLATE, FLAG_FOREGROUND_SERVICE, FLAG_GROUP_SUMMARY, FLAG_LOCAL_ONLY,
    FLAG_ONGOING_EVENT, FLAG_ONLY_ALERT_ONCE, TEMPLATE_MESSAGING,
};
use crate::parse;
use crate::settings::DecoratorSettings;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Package of the decorated app
pub const WECHAT_PACKAGE: &str = "com.tencent.mm";
/// Virtual account aggregating service notification messages
pub const KEY_SERVICE_MESSAGE: &str = "notifymessage";

/// Channel used by the app for all message notifications
const CHANNEL_MESSAGE: &str = "message_channel_new_id";
const OLD_CHANNEL_MESSAGE: &str = "message";
/// Channel used by the app for miscellaneous notifications
const CHANNEL_MISC: &str = "reminder_channel_id";
const OLD_CHANNEL_MISC: &str = "misc";
/// Channel used by the app for its own DND mode
const CHANNEL_DND: &str = "message_dnd_mode_channel_id";
/// Channel used by the app for voice/video calls
const CHANNEL_VOIP: &str = "voip_notify_channel_new_id";
/// Dedicated channel for group conversations (the app has none of its own)
const CHANNEL_GROUP_CONVERSATION: &str = "group";

const GROUP_GROUP: &str = "group.wechat.group";
const GROUP_BOT: &str = "group.wechat.bot";
const GROUP_DIRECT: &str = "group.wechat";
const GROUP_MISC: &str = "misc"; // Not auto-grouped

/// Static notification id of the login confirmation
const NID_LOGIN_CONFIRMATION: i32 = 38;
/// The actual login-confirmation timeout is a little shorter than 5 minutes
const LOGIN_CONFIRMATION_TIMEOUT_MS: i64 = 5 * 60_000;
/// Archived notifications re-parsed per conversation
const MAX_NUM_ARCHIVED: usize = 20;
/// Hard bound on the conversation-id probe
const CONVERSATION_ID_TIMEOUT: Duration = Duration::from_millis(100);
/// Distinct per-conversation notification ids exist since this version
const DISTINCT_ID_MIN_VERSION: i64 = 1340;

const PRIMARY_COLOR: u32 = 0xFF33_B332;
const LIGHT_COLOR: u32 = 0xFF00_FF00;

const HEADER_GROUP_CHAT: &str = "Group chats";
const HEADER_BOT_MESSAGE: &str = "Bot messages";
const HEADER_SERVICE_MESSAGE: &str = "Service messages";
const CHANNEL_NAME_MESSAGE: &str = "Messages";
const CHANNEL_NAME_GROUP: &str = "Group conversations";
const CHANNEL_NAME_MISC: &str = "Miscellaneous";

/// Conversation-type classification policy
///
/// The heuristics encode observed behavior of one app across versions and
/// some branches are acknowledged guesses; hosts may override them without
/// touching the parser.
pub trait TypePolicy: Send + Sync {
    /// Classify from the app's true conversation key
    fn classify_key(&self, key: &str) -> ConversationType;

    /// Classify heuristically from the latest text fields
    fn classify(&self, conversation: &Conversation) -> ConversationType;
}

/// The observed classification rules
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTypePolicy;

impl TypePolicy for DefaultTypePolicy {
    fn classify_key(&self, key: &str) -> ConversationType {
        // "@im.chatroom" is the enterprise variant of group chats.
        if key.ends_with("@chatroom") || key.ends_with("@im.chatroom") {
            ConversationType::GroupChat
        } else if key.starts_with("gh_") || key == KEY_SERVICE_MESSAGE {
            ConversationType::BotMessage
        } else if key.ends_with("@openim") {
            ConversationType::DirectMessage
        } else {
            ConversationType::Unknown
        }
    }

    fn classify(&self, conversation: &Conversation) -> ConversationType {
        parse::guess_conversation_type(conversation)
    }
}

/// The decorator bound and driven by the host service
pub struct WeChatDecorator {
    host: Arc<dyn HostController>,
    shortcuts: Option<Arc<dyn ShortcutPublisher>>,
    policy: Box<dyn TypePolicy>,
    registry: ConversationRegistry,
    messaging: MessagingBuilder,
    settings: DecoratorSettings,
    own_profile: UserProfile,
    /// Dropped once the host reports the group channel banned
    use_extra_channels: bool,
    distinct_id_supported: Option<bool>,
}

impl WeChatDecorator {
    pub fn new(host: Arc<dyn HostController>) -> Self {
        WeChatDecorator {
            host,
            shortcuts: None,
            policy: Box::new(DefaultTypePolicy),
            registry: ConversationRegistry::new(),
            messaging: MessagingBuilder::default(),
            settings: DecoratorSettings::default(),
            own_profile: UserProfile(0),
            use_extra_channels: true,
            distinct_id_supported: None,
        }
    }

    /// Attach the external shortcut/bubble helper
    pub fn with_shortcut_publisher(mut self, shortcuts: Arc<dyn ShortcutPublisher>) -> Self {
        self.shortcuts = Some(shortcuts);
        self
    }

    /// Override the conversation-type classification policy
    pub fn with_type_policy(mut self, policy: Box<dyn TypePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Profile the decorator itself runs in
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.own_profile = profile;
        self
    }

    /// Apply one key/value pair from a host settings-changed event
    pub fn on_settings_changed(&mut self, key: &str, value: bool) {
        self.settings.apply_update(key, value);
    }

    /// Handle the intercepted reply broadcast
    pub fn on_reply(&mut self, proxy: &ReplyProxy, input: &str) {
        self.messaging.handle_reply(self.host.as_ref(), &self.registry, proxy, input);
    }

    /// The decorated app was updated or removed; re-detect its capabilities
    pub fn on_package_changed(&mut self, package: &str) {
        if package == WECHAT_PACKAGE {
            self.distinct_id_supported = None;
        }
    }

    /// Read access to a tracked conversation
    pub fn conversation(&self, profile: UserProfile, id: i32) -> Option<&Conversation> {
        self.registry.get(profile, id)
    }

    /// Whether notification ids are distinct per conversation
    ///
    /// Old app versions reuse a rolling counter as the id after their own
    /// cancellations, overwriting unrelated conversations.
    fn is_distinct_id(&mut self, package: &str) -> bool {
        if let Some(cached) = self.distinct_id_supported {
            return cached;
        }
        let Some(version) = self.host.package_version_code(package).filter(|&v| v != 0) else {
            return false;
        };
        let supported = version >= DISTINCT_ID_MIN_VERSION;
        self.distinct_id_supported = Some(supported);
        supported
    }

    fn is_group_channel_available(&self, profile: UserProfile) -> bool {
        self.host
            .notification_channel(WECHAT_PACKAGE, profile, CHANNEL_GROUP_CONVERSATION)
            .is_some()
    }

    fn make_channel(&self, id: &str, name: &str, silent: bool) -> NotificationChannel {
        NotificationChannel {
            id: id.to_string(),
            name: name.to_string(),
            importance: ChannelImportance::High, // Allow heads-up by default
            silent,
            lights: true,
            light_color: LIGHT_COLOR,
        }
    }

    /// Carry user customizations of a legacy channel over to its new id
    fn migrate_channel(&self, old_id: &str, new_id: &str, name: &str, silent: bool) -> NotificationChannel {
        let existing = self.host.notification_channel(WECHAT_PACKAGE, self.own_profile, old_id);
        self.host.delete_notification_channel(WECHAT_PACKAGE, self.own_profile, old_id);
        match existing {
            Some(channel) => NotificationChannel {
                id: new_id.to_string(),
                name: name.to_string(),
                ..channel
            },
            None => self.make_channel(new_id, name, silent),
        }
    }
}

#[async_trait]
impl Decorator for WeChatDecorator {
    fn name(&self) -> &str {
        "wechat"
    }

    async fn apply(&mut self, evolving: &mut EvolvingNotification) -> bool {
        if evolving.notification.has_flag(FLAG_GROUP_SUMMARY) {
            let header = match evolving.notification.group.as_deref() {
                Some(GROUP_GROUP) => HEADER_GROUP_CHAT,
                Some(GROUP_BOT) => HEADER_BOT_MESSAGE,
                _ => return false,
            };
            evolving.notification.extras.insert(EXTRA_SUB_TEXT.to_string(), json!(header));
            return true;
        }

        let Some(title) = evolving.notification.title.clone().filter(|t| !t.is_empty()) else {
            error!("title is missing: {}", evolving.key);
            return false;
        };
        let channel = evolving.notification.channel_id.clone();
        if evolving.notification.has_flag(FLAG_ONGOING_EVENT) && channel.as_deref() == Some(CHANNEL_VOIP) {
            return false;
        }

        evolving.notification.color = PRIMARY_COLOR; // Tint the small icon
        evolving.notification.extras.insert(EXTRA_SHOW_WHEN.to_string(), json!(true));
        if self.settings.wear {
            evolving.notification.clear_flag(FLAG_LOCAL_ONLY);
        }

        if evolving.notification.ticker.is_none() || channel.as_deref() == Some(CHANNEL_MISC) {
            // E.g. the web login confirmation.
            let n = &mut evolving.notification;
            if channel.is_none() {
                n.channel_id = Some(CHANNEL_MISC.to_string());
            }
            n.group = Some(GROUP_MISC.to_string()); // Avoid auto-grouping
            if evolving.id == NID_LOGIN_CONFIRMATION {
                n.timeout_after = Some(LOGIN_CONFIRMATION_TIMEOUT_MS);
            }
            debug!("skipping non-conversation notification: {title}");
            return !n.has_flag(FLAG_FOREGROUND_SERVICE);
        }
        let Some(content_text) = evolving.notification.text.clone() else { return true };

        let input_history = evolving.notification.input_history();
        if !input_history.is_empty() {
            // No more alerts for direct-replied notifications.
            evolving.notification.set_flag(FLAG_ONLY_ALERT_ONCE);
        }

        let profile = evolving.profile;
        if !self.is_distinct_id(&evolving.package) {
            // Reused rolling ids would merge unrelated conversations; key by
            // the (stable) title instead. Not the original title, which may
            // have already evolved.
            evolving.set_id(title_hash(&title));
        }
        let conversation = self.registry.get_or_create(profile, evolving.id);
        conversation.icon = evolving
            .notification
            .large_icon
            .clone()
            .or_else(|| evolving.notification.small_icon.clone());
        conversation.title = Some(title.clone());
        conversation.summary = Some(content_text);
        conversation.ticker = evolving.notification.ticker.clone();
        conversation.timestamp = evolving.notification.when;
        conversation.payload = evolving.notification.unread_conversation.clone();

        if conversation.id().is_none() {
            if let Some(receiver) = self.host.request_conversation_id(evolving) {
                match timeout(CONVERSATION_ID_TIMEOUT, receiver).await {
                    Ok(Ok(id)) => {
                        debug!("conversation id resolved: {id}");
                        conversation.set_id(id);
                    }
                    Ok(Err(_)) => debug!("conversation id probe dropped"),
                    Err(_) => warn!("timed out resolving conversation id for {title}"),
                }
            }
        }

        match conversation.id().map(str::to_string) {
            Some(cid) => {
                let from_key = self.policy.classify_key(&cid);
                conversation.set_type(from_key);
            }
            None => {
                if conversation.is_type_unknown() {
                    let guess = self.policy.classify(conversation);
                    conversation.set_type(guess);
                }
            }
        }

        let original_key = evolving.original_key.clone();
        let mut built = self.messaging.build_from_conversation(conversation, evolving);
        if built.is_none() {
            let archive = self.host.archived_notifications(&original_key, MAX_NUM_ARCHIVED);
            built = self.messaging.build_from_archive(
                conversation,
                &mut evolving.notification,
                &title,
                &archive,
            );
        }
        let Some(mut messaging) = built else { return true };
        if messaging.messages.is_empty() {
            return true;
        }

        if !input_history.is_empty() {
            // Re-present replied text as messages from the device user.
            for text in input_history.iter().rev() {
                messaging.messages.push(Message { text: text.clone(), timestamp: 0, person: None });
            }
            evolving.notification.extras.remove(EXTRA_REMOTE_INPUT_HISTORY);
        }

        let is_group_chat = conversation.is_group_chat();
        {
            let n = &mut evolving.notification;
            if conversation.id() == Some(KEY_SERVICE_MESSAGE) {
                // A special header for this non-group conversation with
                // multiple senders.
                messaging.conversation_title = Some(HEADER_SERVICE_MESSAGE.to_string());
                n.group = Some(GROUP_BOT.to_string());
            } else {
                let group = if is_group_chat {
                    GROUP_GROUP
                } else if conversation.is_bot_message() {
                    GROUP_BOT
                } else {
                    GROUP_DIRECT
                };
                n.group = Some(group.to_string());
            }

            if is_group_chat && self.use_extra_channels && channel.as_deref() != Some(CHANNEL_DND) {
                n.channel_id = Some(CHANNEL_GROUP_CONVERSATION.to_string());
            } else if channel.is_none() {
                n.channel_id = Some(CHANNEL_MESSAGE.to_string());
            }

            if is_group_chat {
                messaging.is_group_conversation = true;
                messaging.conversation_title = Some(title.clone());
            }
            messaging::flat_into_extras(&messaging, &mut n.extras);
            n.extras.insert(EXTRA_TEMPLATE.to_string(), json!(TEMPLATE_MESSAGING));
        }

        if let Some(publisher) = &self.shortcuts {
            if conversation.is_chat() && !conversation.is_bot_message() {
                if let Some(cid) = conversation.id() {
                    let shortcut_id = build_shortcut_id(cid);
                    if publisher.update_shortcut_if_needed(&shortcut_id, conversation, profile) {
                        evolving.notification.shortcut_id = Some(shortcut_id.clone());
                    }
                    evolving.notification.locus_id = Some(shortcut_id);
                }
            }
        }
        true
    }

    fn on_notification_removed(&mut self, key: &str, reason: RemovalReason) -> bool {
        match reason {
            RemovalReason::AppCancel => {
                // Ongoing notification, or a removal-aware evolution.
                debug!("notification cancelled by app: {key}");
            }
            RemovalReason::ChannelBanned => {
                if !self.is_group_channel_available(profile_of_key(key)) {
                    warn!("group channel lost, disabling extra channels from now on");
                    self.use_extra_channels = false;
                    self.host.recast_notification(key, None);
                }
            }
            RemovalReason::Cancel => self.messaging.mark_read(key),
            RemovalReason::Other(code) => debug!("ignoring removal of {key}, reason {code}"),
        }
        false
    }

    async fn on_connected(&mut self) {
        let channels = vec![
            self.make_channel(CHANNEL_GROUP_CONVERSATION, CHANNEL_NAME_GROUP, false),
            // Versions of the app targeting modern platforms bring their own
            // message and misc channels; migrate from the legacy ids.
            self.migrate_channel(OLD_CHANNEL_MESSAGE, CHANNEL_MESSAGE, CHANNEL_NAME_MESSAGE, false),
            self.migrate_channel(OLD_CHANNEL_MISC, CHANNEL_MISC, CHANNEL_NAME_MISC, true),
        ];
        if let Err(e) = self
            .host
            .create_notification_channels(WECHAT_PACKAGE, self.own_profile, channels)
        {
            warn!("failed to create notification channels: {e}");
        }
    }
}

/// Stable hash of a conversation title, used as a fallback notification id
fn title_hash(title: &str) -> i32 {
    title
        .chars()
        .fold(0i32, |hash, c| hash.wrapping_mul(31).wrapping_add(c as i32))
}

/// Profile encoded in an evolved notification key (`<user>|<package>|...`)
fn profile_of_key(key: &str) -> UserProfile {
    if let Some(pos) = key.find('|').filter(|&p| p > 0) {
        if let Ok(user) = key[..pos].parse() {
            return UserProfile(user);
        }
    }
    error!("invalid key: {key}");
    UserProfile(0) // Only correct for a single-user device
}
