//! Addressable entities: servers and channels.
//!
//! Channels are one type carrying a [`ChannelKind`] tag. Typed accessors
//! filter by capability instead of by concrete type.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{CordError, CordResult};

/// A 64-bit entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snowflake(pub u64);

impl Snowflake {
    /// Parse a string id; unparsable ids yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok().map(Self)
    }

    /// Read an id from a JSON string or number.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(raw) => Self::parse(raw),
            Value::Number(n) => n.as_u64().map(Self),
            _ => None,
        }
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a channel can be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Carries text messages.
    Text,
    /// Carries voice.
    Voice,
    /// Belongs to a server.
    Server,
}

/// The closed set of channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Text channel of a server.
    ServerText,
    /// Voice channel of a server.
    ServerVoice,
    /// One-to-one conversation.
    Private,
    /// Group conversation.
    Group,
}

impl ChannelKind {
    /// Map the wire type code.
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::ServerText),
            1 => Some(Self::Private),
            2 => Some(Self::ServerVoice),
            3 => Some(Self::Group),
            _ => None,
        }
    }

    /// Whether channels of this kind have `capability`.
    #[must_use]
    pub const fn supports(self, capability: Capability) -> bool {
        match capability {
            Capability::Text => matches!(self, Self::ServerText | Self::Private | Self::Group),
            Capability::Voice => matches!(self, Self::ServerVoice | Self::Private | Self::Group),
            Capability::Server => matches!(self, Self::ServerText | Self::ServerVoice),
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServerText => "server text",
            Self::ServerVoice => "server voice",
            Self::Private => "private",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Channel id.
    pub id: Snowflake,
    /// Kind tag.
    pub kind: ChannelKind,
    /// Display name; private channels have none.
    pub name: Option<String>,
    /// Owning server, for server channels.
    pub server_id: Option<Snowflake>,
}

impl Channel {
    /// Whether the channel has `capability`.
    #[must_use]
    pub const fn supports(&self, capability: Capability) -> bool {
        self.kind.supports(capability)
    }

    /// Check the channel is of `expected` kind.
    ///
    /// # Errors
    ///
    /// Returns [`CordError::ChannelKind`] on a mismatch.
    pub fn expect_kind(&self, expected: ChannelKind) -> CordResult<&Self> {
        if self.kind == expected {
            Ok(self)
        } else {
            Err(CordError::ChannelKind {
                id: self.id.0,
                expected,
                actual: self.kind,
            })
        }
    }

    /// Build from a channel object; `None` if the id or type is unusable.
    #[must_use]
    pub fn from_value(value: &Value, server_id: Option<Snowflake>) -> Option<Self> {
        let id = Snowflake::from_value(value.get("id")?)?;
        let kind = ChannelKind::from_code(value.get("type")?.as_u64()?)?;
        let server_id = server_id.or_else(|| value.get("guild_id").and_then(Snowflake::from_value));
        Some(Self {
            id,
            kind,
            name: value.get("name").and_then(Value::as_str).map(str::to_string),
            server_id,
        })
    }
}

/// A server and the ids of its channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    /// Server id.
    pub id: Snowflake,
    /// Display name.
    pub name: String,
    /// Channel ids.
    pub channel_ids: Vec<Snowflake>,
}

#[derive(Debug, Default)]
struct Entities {
    servers: HashMap<Snowflake, Server>,
    channels: HashMap<Snowflake, Channel>,
}

/// In-memory index of the servers and channels the bot can see.
#[derive(Debug, Default)]
pub struct EntityCache {
    inner: RwLock<Entities>,
}

impl EntityCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a server.
    pub fn insert_server(&self, server: Server) {
        self.inner.write().servers.insert(server.id, server);
    }

    /// Insert or replace a channel.
    pub fn insert_channel(&self, channel: Channel) {
        let mut inner = self.inner.write();
        if let Some(server) = channel.server_id.and_then(|id| inner.servers.get_mut(&id)) {
            if !server.channel_ids.contains(&channel.id) {
                server.channel_ids.push(channel.id);
            }
        }
        inner.channels.insert(channel.id, channel);
    }

    /// Remove a server and its channels.
    pub fn remove_server(&self, id: Snowflake) -> Option<Server> {
        let mut inner = self.inner.write();
        let server = inner.servers.remove(&id)?;
        for channel_id in &server.channel_ids {
            inner.channels.remove(channel_id);
        }
        Some(server)
    }

    /// Remove a channel.
    pub fn remove_channel(&self, id: Snowflake) -> Option<Channel> {
        let mut inner = self.inner.write();
        let channel = inner.channels.remove(&id)?;
        if let Some(server) = channel.server_id.and_then(|sid| inner.servers.get_mut(&sid)) {
            server.channel_ids.retain(|&c| c != id);
        }
        Some(channel)
    }

    /// Every known server.
    #[must_use]
    pub fn servers(&self) -> Vec<Server> {
        self.inner.read().servers.values().cloned().collect()
    }

    /// A server by id.
    #[must_use]
    pub fn server_by_id(&self, id: Snowflake) -> Option<Server> {
        self.inner.read().servers.get(&id).cloned()
    }

    /// A server by string id.
    #[must_use]
    pub fn server_by_id_str(&self, id: &str) -> Option<Server> {
        Snowflake::parse(id).and_then(|id| self.server_by_id(id))
    }

    /// A channel of any kind.
    #[must_use]
    pub fn channel_by_id(&self, id: Snowflake) -> Option<Channel> {
        self.inner.read().channels.get(&id).cloned()
    }

    /// A channel of any kind, by string id.
    #[must_use]
    pub fn channel_by_id_str(&self, id: &str) -> Option<Channel> {
        Snowflake::parse(id).and_then(|id| self.channel_by_id(id))
    }

    fn channel_with(&self, id: Snowflake, capability: Capability) -> Option<Channel> {
        self.channel_by_id(id).filter(|c| c.supports(capability))
    }

    fn channel_of_kind(&self, id: Snowflake, kind: ChannelKind) -> Option<Channel> {
        self.channel_by_id(id).filter(|c| c.kind == kind)
    }

    /// A channel that carries text.
    #[must_use]
    pub fn text_channel_by_id(&self, id: Snowflake) -> Option<Channel> {
        self.channel_with(id, Capability::Text)
    }

    /// A channel that carries text, by string id.
    #[must_use]
    pub fn text_channel_by_id_str(&self, id: &str) -> Option<Channel> {
        Snowflake::parse(id).and_then(|id| self.text_channel_by_id(id))
    }

    /// A channel that carries voice.
    #[must_use]
    pub fn voice_channel_by_id(&self, id: Snowflake) -> Option<Channel> {
        self.channel_with(id, Capability::Voice)
    }

    /// A channel that carries voice, by string id.
    #[must_use]
    pub fn voice_channel_by_id_str(&self, id: &str) -> Option<Channel> {
        Snowflake::parse(id).and_then(|id| self.voice_channel_by_id(id))
    }

    /// A server text channel.
    #[must_use]
    pub fn server_text_channel_by_id(&self, id: Snowflake) -> Option<Channel> {
        self.channel_of_kind(id, ChannelKind::ServerText)
    }

    /// A server text channel, by string id.
    #[must_use]
    pub fn server_text_channel_by_id_str(&self, id: &str) -> Option<Channel> {
        Snowflake::parse(id).and_then(|id| self.server_text_channel_by_id(id))
    }

    /// A server voice channel.
    #[must_use]
    pub fn server_voice_channel_by_id(&self, id: Snowflake) -> Option<Channel> {
        self.channel_of_kind(id, ChannelKind::ServerVoice)
    }

    /// A server voice channel, by string id.
    #[must_use]
    pub fn server_voice_channel_by_id_str(&self, id: &str) -> Option<Channel> {
        Snowflake::parse(id).and_then(|id| self.server_voice_channel_by_id(id))
    }

    /// A private channel.
    #[must_use]
    pub fn private_channel_by_id(&self, id: Snowflake) -> Option<Channel> {
        self.channel_of_kind(id, ChannelKind::Private)
    }

    /// A private channel, by string id.
    #[must_use]
    pub fn private_channel_by_id_str(&self, id: &str) -> Option<Channel> {
        Snowflake::parse(id).and_then(|id| self.private_channel_by_id(id))
    }

    /// A group channel.
    #[must_use]
    pub fn group_channel_by_id(&self, id: Snowflake) -> Option<Channel> {
        self.channel_of_kind(id, ChannelKind::Group)
    }

    /// A group channel, by string id.
    #[must_use]
    pub fn group_channel_by_id_str(&self, id: &str) -> Option<Channel> {
        Snowflake::parse(id).and_then(|id| self.group_channel_by_id(id))
    }

    /// Update the cache from a gateway dispatch. Unknown events are ignored.
    pub fn ingest(&self, event: &str, data: &Value) {
        match event {
            "GUILD_CREATE" => {
                let Some(id) = data.get("id").and_then(Snowflake::from_value) else {
                    return;
                };
                let name = data
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let channels: Vec<Channel> = data
                    .get("channels")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(|c| Channel::from_value(c, Some(id)))
                            .collect()
                    })
                    .unwrap_or_default();

                debug!(server = %id, channels = channels.len(), "server cached");
                self.insert_server(Server {
                    id,
                    name,
                    channel_ids: channels.iter().map(|c| c.id).collect(),
                });
                for channel in channels {
                    self.insert_channel(channel);
                }
            }
            "GUILD_DELETE" => {
                if let Some(id) = data.get("id").and_then(Snowflake::from_value) {
                    self.remove_server(id);
                }
            }
            "CHANNEL_CREATE" => {
                if let Some(channel) = Channel::from_value(data, None) {
                    self.insert_channel(channel);
                }
            }
            "CHANNEL_DELETE" => {
                if let Some(id) = data.get("id").and_then(Snowflake::from_value) {
                    self.remove_channel(id);
                }
            }
            other => trace!(event = other, "not cached"),
        }
    }
}
