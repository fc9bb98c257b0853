//! Host framework boundary
//!
//! The decorator runs inside a host "notification evolution" service it
//! does not control: the host delivers each notification update on one
//! serialized callback thread, applies whatever the decorator writes back,
//! and retains superseded notifications in an archive. This module pins
//! down that boundary — the [`Decorator`] contract the host drives, and the
//! [`HostController`] surface the decorator calls back into.
//!
//! ## Decorator Lifecycle
//!
//! ```text
//! Created → Connected → apply() per notification update → Destroyed
//!                     ↘ on_notification_removed() per removal
//! ```
//!
//! Nothing here is allowed to panic into the host's dispatch path; every
//! entry point degrades to "leave the notification unmodified".

use crate::conversation::Conversation;
use crate::notification::{EvolvingNotification, Extras, Notification, UserProfile};
use crate::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Why a notification was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Dismissed by the user
    Cancel,
    /// Cancelled by the posting app
    AppCancel,
    /// The channel it was posted on was banned
    ChannelBanned,
    /// Any other host-reported reason
    Other(i32),
}

/// Importance of a notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelImportance {
    /// Allow heads-up
    High,
    #[default]
    Default,
    Low,
}

/// A notification channel managed through the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub importance: ChannelImportance,
    /// No sound on delivery
    pub silent: bool,
    /// Blink the notification light
    pub lights: bool,
    /// Notification light color (ARGB)
    pub light_color: u32,
}

/// Contract the host drives for each bound decorator
///
/// All callbacks are delivered on one serialized thread; implementations
/// need no internal locking for state only touched from these callbacks.
#[async_trait]
pub trait Decorator: Send + Sync {
    /// Short identifier of this decorator
    fn name(&self) -> &str;

    /// Evolve one notification in place
    ///
    /// Returns `false` to leave the notification exactly as delivered.
    /// Must never panic; any internal failure degrades to `false`.
    async fn apply(&mut self, evolving: &mut EvolvingNotification) -> bool;

    /// A notification of the decorated package was removed
    ///
    /// Returns `true` if the removal was consumed by the decorator.
    fn on_notification_removed(&mut self, _key: &str, _reason: RemovalReason) -> bool {
        false
    }

    /// The host connected this decorator; channels may be (re)created here
    async fn on_connected(&mut self) {}
}

/// Services the host exposes back to the decorator
pub trait HostController: Send + Sync {
    /// Re-run decoration for a notification key, optionally merging
    /// additional extras into it first
    fn recast_notification(&self, key: &str, addition: Option<Extras>);

    /// Up to `limit` superseded notifications retained for the same
    /// original key. Order is not guaranteed; entries may even belong to a
    /// different conversation that reused the notification id.
    fn archived_notifications(&self, original_key: &str, limit: usize) -> Vec<EvolvingNotification>;

    /// Create (or update) notification channels for a package
    fn create_notification_channels(
        &self,
        package: &str,
        profile: UserProfile,
        channels: Vec<NotificationChannel>,
    ) -> Result<()>;

    /// Look up a channel previously created for a package
    fn notification_channel(
        &self,
        package: &str,
        profile: UserProfile,
        channel_id: &str,
    ) -> Option<NotificationChannel>;

    /// Delete a channel previously created for a package
    fn delete_notification_channel(&self, package: &str, profile: UserProfile, channel_id: &str);

    /// Ask the source app for the true conversation identifier behind a
    /// notification, by probing its UI intent handling
    ///
    /// Returns `None` when no probe route exists. The answer may never
    /// arrive; callers must bound their wait.
    fn request_conversation_id(
        &self,
        _evolving: &EvolvingNotification,
    ) -> Option<oneshot::Receiver<String>> {
        None
    }

    /// Version code of an installed package, if known
    fn package_version_code(&self, _package: &str) -> Option<i64> {
        None
    }

    /// Post an auxiliary notification (diagnostic surface; inert in
    /// production builds)
    fn post_notification(&self, _tag: i32, _notification: Notification) {}
}

/// External shortcut/bubble helper
///
/// Shortcut management lives outside this crate; the decorator only asks
/// whether a conversation shortcut is ready so it can attach the shortcut
/// and locus ids to the evolved notification.
pub trait ShortcutPublisher: Send + Sync {
    /// Publish or refresh the dynamic shortcut for a conversation
    ///
    /// Returns `true` once the shortcut is ready to be referenced.
    fn update_shortcut_if_needed(
        &self,
        shortcut_id: &str,
        conversation: &Conversation,
        profile: UserProfile,
    ) -> bool;
}

/// Shortcut id for a conversation key
pub fn build_shortcut_id(conversation_key: &str) -> String {
    format!("C:{conversation_key}")
}
