//! Parsed chat log messages.
//!
//! Every line read from a chat log becomes exactly one [`Message`]: the raw
//! line together with a [`MessageData`] payload describing what was found in
//! it. Lines that match nothing are kept as [`MessageData::Unknown`].

use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum number of characters the client allows in a player name.
pub const MAX_NAMELEN: usize = 24;

/// Discriminant of a parsed [`Message`].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MessageKind {
    Pub,
    Team,
    Private,
    Remote,
    Freq,
    Chat,
    Kill,
    QueryNamelen,
    QueryLog,
    QueryFind,
    Unknown,
    /// Caller-defined kind, identified by its tag.
    Custom(String),
}

impl MessageKind {
    /// Creates a caller-defined kind.
    pub fn custom(tag: impl Into<String>) -> Self {
        MessageKind::Custom(tag.into())
    }

    /// Returns `true` for the kinds whose payload is a player name and text.
    pub fn is_player(&self) -> bool {
        matches!(
            self,
            MessageKind::Pub
                | MessageKind::Team
                | MessageKind::Private
                | MessageKind::Remote
                | MessageKind::Freq
                | MessageKind::Chat
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Pub => "pub",
            MessageKind::Team => "team",
            MessageKind::Private => "private",
            MessageKind::Remote => "remote",
            MessageKind::Freq => "freq",
            MessageKind::Chat => "chat",
            MessageKind::Kill => "kill",
            MessageKind::QueryNamelen => "?namelen",
            MessageKind::QueryLog => "?log",
            MessageKind::QueryFind => "?find",
            MessageKind::Unknown => "unknown",
            MessageKind::Custom(tag) => tag.as_str(),
        };

        f.pad(name)
    }
}

/// Name and text of a message sent by a player.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlayerMessage {
    pub name: String,
    pub message: String,
}

/// A message on a numbered chat channel: `C 1:Name> Message`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChatMessage {
    pub channel: u32,
    pub name: String,
    pub message: String,
}

/// A remote private message, either sent by us (`own`) or received.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemoteMessage {
    pub own: bool,
    /// The name starts with the squad marker (`#`).
    pub squad: bool,
    pub name: String,
    pub message: String,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KillMessage {
    pub killed: String,
    pub bounty: u32,
    pub killer: String,
}

/// The client's reply to `?namelen`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueryNamelenMessage {
    pub namelen: u32,
}

impl QueryNamelenMessage {
    /// Returns `true` if the reported width is larger than [`MAX_NAMELEN`].
    pub fn exceeds_max(&self) -> bool {
        self.namelen as usize > MAX_NAMELEN
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LogType {
    Open,
    Close,
}

/// The client's reply to `?log`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueryLogMessage {
    pub log_type: LogType,
    pub filename: Option<String>,
}

/// What a `?find` reply said about the player.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FindResult {
    /// Not online; last seen `days` ago, or more than that if `more`.
    Days { more: bool, days: u32 },
    /// Not online; last seen `hours` ago.
    Hours { hours: u32 },
    Arena {
        player: String,
        arena: String,
        private: bool,
    },
    Zone { player: String, zone: String },
}

/// The client's reply to `?find`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueryFindMessage {
    pub find: FindResult,
}

/// Payload of a caller-defined kind.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CustomMessage {
    pub tag: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MessageData {
    Pub(PlayerMessage),
    Team(PlayerMessage),
    Private(PlayerMessage),
    Remote(RemoteMessage),
    Freq(PlayerMessage),
    Chat(ChatMessage),
    Kill(KillMessage),
    QueryNamelen(QueryNamelenMessage),
    QueryLog(QueryLogMessage),
    QueryFind(QueryFindMessage),
    Custom(CustomMessage),
    Unknown,
}

/// A single parsed line of a chat log.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Message {
    line: String,
    data: MessageData,
}

impl Message {
    pub fn new(line: impl Into<String>, data: MessageData) -> Self {
        Message {
            line: line.into(),
            data,
        }
    }

    /// A message that matched no known pattern.
    pub fn unknown(line: impl Into<String>) -> Self {
        Message::new(line, MessageData::Unknown)
    }

    /// A message of a caller-defined kind.
    pub fn custom(
        line: impl Into<String>,
        tag: impl Into<String>,
        fields: BTreeMap<String, String>,
    ) -> Self {
        Message::new(
            line,
            MessageData::Custom(CustomMessage {
                tag: tag.into(),
                fields,
            }),
        )
    }

    /// Returns the raw (unparsed) line.
    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn data(&self) -> &MessageData {
        &self.data
    }

    pub fn into_inner(self) -> (String, MessageData) {
        (self.line, self.data)
    }

    pub fn kind(&self) -> MessageKind {
        match &self.data {
            MessageData::Pub(_) => MessageKind::Pub,
            MessageData::Team(_) => MessageKind::Team,
            MessageData::Private(_) => MessageKind::Private,
            MessageData::Remote(_) => MessageKind::Remote,
            MessageData::Freq(_) => MessageKind::Freq,
            MessageData::Chat(_) => MessageKind::Chat,
            MessageData::Kill(_) => MessageKind::Kill,
            MessageData::QueryNamelen(_) => MessageKind::QueryNamelen,
            MessageData::QueryLog(_) => MessageKind::QueryLog,
            MessageData::QueryFind(_) => MessageKind::QueryFind,
            MessageData::Custom(custom) => MessageKind::Custom(custom.tag.clone()),
            MessageData::Unknown => MessageKind::Unknown,
        }
    }

    /// Returns `true` if this message is of the given kind.
    pub fn is_kind(&self, kind: &MessageKind) -> bool {
        match (&self.data, kind) {
            (MessageData::Custom(custom), MessageKind::Custom(tag)) => custom.tag == *tag,
            _ => self.kind() == *kind,
        }
    }

    /// Name of the sending player, for player kinds.
    pub fn name(&self) -> Option<&str> {
        match &self.data {
            MessageData::Pub(p)
            | MessageData::Team(p)
            | MessageData::Private(p)
            | MessageData::Freq(p) => Some(&p.name),
            MessageData::Remote(r) => Some(&r.name),
            MessageData::Chat(c) => Some(&c.name),
            _ => None,
        }
    }

    /// Text sent by the player, for player kinds.
    pub fn text(&self) -> Option<&str> {
        match &self.data {
            MessageData::Pub(p)
            | MessageData::Team(p)
            | MessageData::Private(p)
            | MessageData::Freq(p) => Some(&p.message),
            MessageData::Remote(r) => Some(&r.message),
            MessageData::Chat(c) => Some(&c.message),
            _ => None,
        }
    }
}
