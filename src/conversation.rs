//! Conversation state and registry
//!
//! One [`Conversation`] exists per (user profile, conversation numeric id)
//! pair, created on first sight and kept for the lifetime of the registry.
//! It accumulates the latest raw notification fields, the inferred
//! conversation type, and — for group chats — a roster of participants.
//!
//! ## Concurrency
//!
//! The registry performs no internal locking: the host delivers all
//! notification callbacks on one serialized thread, so access follows a
//! single-writer discipline. Callers needing cross-thread reads must wrap
//! the registry in their own synchronization (e.g. a mutex or an actor
//! boundary).

use crate::emoji;
use crate::notification::{IconRef, UnreadConversation, UserProfile};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Scheme prefix storing a participant's original (un-translated) name
const SCHEME_ORIGINAL_NAME: &str = "ON:";

/// Inferred kind of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationType {
    /// Not enough evidence yet
    #[default]
    Unknown,
    /// 1:1 chat with a person
    DirectMessage,
    /// Multi-participant chat
    GroupChat,
    /// Bot or service account message
    BotMessage,
}

/// Sender identity surfaced in the structured message list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    /// Display name (emoji-translated)
    pub name: String,
    /// Stable key, when known
    pub key: Option<String>,
    /// Ancillary URI; carries the original name under the `ON:` scheme
    pub uri: Option<String>,
    /// Whether this identity is a bot/service account
    pub bot: bool,
    /// Avatar reference
    pub icon: Option<IconRef>,
}

impl Person {
    /// Placeholder for group-chat conversations, where the real sender is
    /// attached per message. The name cannot be empty, or downstream
    /// consumers treat it as absent.
    fn placeholder() -> Self {
        Person { name: " ".to_string(), key: None, uri: None, bot: false, icon: None }
    }

    /// The participant name as observed in the notification, before emoji
    /// translation
    pub fn original_name(&self) -> &str {
        match &self.uri {
            Some(uri) if uri.starts_with(SCHEME_ORIGINAL_NAME) => &uri[SCHEME_ORIGINAL_NAME.len()..],
            _ => &self.name,
        }
    }
}

/// Mutable per-conversation state
#[derive(Debug, Default)]
pub struct Conversation {
    /// Stable notification id of the conversation (hash-derived, immutable)
    pub nid: i32,
    /// Unread count extracted from the latest summary prefix
    pub unread_count: u32,
    /// Latest conversation display name
    pub title: Option<String>,
    /// Latest full unread-content line
    pub summary: Option<String>,
    /// Latest one-line announcement
    pub ticker: Option<String>,
    /// Latest message time in milliseconds
    pub timestamp: i64,
    /// Latest avatar reference
    pub icon: Option<IconRef>,
    /// Structured payload of the latest notification; replaced wholesale
    pub payload: Option<UnreadConversation>,

    id: Option<String>,
    conversation_type: ConversationType,
    participants: HashMap<String, Person>,
}

impl Conversation {
    fn new(nid: i32) -> Self {
        Conversation { nid, ..Conversation::default() }
    }

    /// The app's true conversation identifier, once obtained
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Record the true conversation identifier
    ///
    /// The identifier is immutable once set; a differing late arrival is
    /// logged and ignored.
    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        match &self.id {
            None => self.id = Some(id),
            Some(existing) if *existing != id => {
                warn!(nid = self.nid, "ignoring conflicting conversation id: {existing} vs {id}")
            }
            Some(_) => {}
        }
    }

    /// Current conversation type
    pub fn conversation_type(&self) -> ConversationType {
        self.conversation_type
    }

    /// Transition the conversation type
    ///
    /// The cached sender identity is derived from the type, so it is
    /// rebuilt on the next use; leaving [`ConversationType::GroupChat`]
    /// clears the participant roster.
    ///
    /// Returns the previous type.
    pub fn set_type(&mut self, conversation_type: ConversationType) -> ConversationType {
        if conversation_type == self.conversation_type {
            return conversation_type;
        }
        let previous = self.conversation_type;
        self.conversation_type = conversation_type;
        if conversation_type != ConversationType::GroupChat {
            self.participants.clear();
        }
        previous
    }

    pub fn is_group_chat(&self) -> bool {
        self.conversation_type == ConversationType::GroupChat
    }

    pub fn is_bot_message(&self) -> bool {
        self.conversation_type == ConversationType::BotMessage
    }

    pub fn is_type_unknown(&self) -> bool {
        self.conversation_type == ConversationType::Unknown
    }

    /// Whether this conversation looks like a chat at all (its ticker
    /// carries a `sender: text` announcement)
    pub fn is_chat(&self) -> bool {
        self.ticker
            .as_deref()
            .and_then(|t| t.find(':'))
            .is_some_and(|pos| pos > 0)
    }

    /// Derive the identity that sent this conversation's messages
    ///
    /// Pure function of the current type and fields: group chats get a
    /// placeholder (the real sender is attached per message), bot
    /// conversations a bot identity, everything else the conversation
    /// title and icon.
    pub fn sender(&self) -> Person {
        match self.conversation_type {
            ConversationType::GroupChat => Person::placeholder(),
            conversation_type => Person {
                // The name cannot be empty, or it is treated as absent.
                name: self.title.clone().filter(|t| !t.is_empty()).unwrap_or_else(|| " ".to_string()),
                key: self.id.clone(),
                uri: None,
                bot: conversation_type == ConversationType::BotMessage,
                icon: self.icon.clone(),
            },
        }
    }

    /// Look up or create a group participant
    ///
    /// Keyed by the sender key with the original (un-translated) name used
    /// for equality, while the emoji-translated name is stored for
    /// display. A rename replaces the roster entry rather than mutating it
    /// in place. Returns `None` outside group chats.
    pub fn group_participant(&mut self, key: &str, name: &str) -> Option<Person> {
        if !self.is_group_chat() {
            debug!(nid = self.nid, "participant lookup outside a group chat");
            return None;
        }
        let rebuild = match self.participants.get(key) {
            None => true,
            Some(existing) => existing.original_name() != name,
        };
        if rebuild {
            let person = Person {
                name: emoji::translate(name).into_owned(),
                key: Some(key.to_string()),
                uri: Some(format!("{SCHEME_ORIGINAL_NAME}{name}")),
                bot: false,
                icon: None,
            };
            self.participants.insert(key.to_string(), person);
        }
        self.participants.get(key).cloned()
    }

    #[cfg(test)]
    pub(crate) fn participant_count(&self) -> usize {
        self.participants.len()
    }
}

/// Two-level store of all conversations, keyed by profile then numeric id
///
/// Conversations are created on first sight and never evicted; a host
/// process restart resets the registry.
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    conversations: HashMap<UserProfile, HashMap<i32, Conversation>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the conversation for `(profile, id)`, creating it on miss
    pub fn get_or_create(&mut self, profile: UserProfile, id: i32) -> &mut Conversation {
        self.conversations
            .entry(profile)
            .or_default()
            .entry(id)
            .or_insert_with(|| Conversation::new(id))
    }

    /// Fetch an existing conversation without creating one
    pub fn get(&self, profile: UserProfile, id: i32) -> Option<&Conversation> {
        self.conversations.get(&profile)?.get(&id)
    }

    /// Mutable variant of [`get`](Self::get)
    pub fn get_mut(&mut self, profile: UserProfile, id: i32) -> Option<&mut Conversation> {
        self.conversations.get_mut(&profile)?.get_mut(&id)
    }
}
