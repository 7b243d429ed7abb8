//! The bot's desired presence.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Online status shown to other users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Online.
    #[default]
    Online,
    /// Away.
    Idle,
    /// Do not disturb.
    Dnd,
    /// Shown as offline.
    Invisible,
}

impl Status {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::Dnd => "dnd",
            Self::Invisible => "invisible",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the activity line says the bot is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    /// "Playing ..."
    Playing,
    /// "Streaming ...", linked to a stream url.
    Streaming,
}

impl GameKind {
    const fn code(self) -> u8 {
        match self {
            Self::Playing => 0,
            Self::Streaming => 1,
        }
    }
}

/// The activity line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Text shown after the verb.
    pub name: String,
    /// Playing or streaming.
    pub kind: GameKind,
    /// Stream url, for [`GameKind::Streaming`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Game {
    /// A "Playing" game.
    #[must_use]
    pub fn playing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: GameKind::Playing,
            url: None,
        }
    }

    /// A "Streaming" game.
    #[must_use]
    pub fn streaming(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: GameKind::Streaming,
            url: Some(url.into()),
        }
    }
}

/// Desired presence. Sent with every identify and as presence updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Online status.
    #[serde(default)]
    pub status: Status,
    /// Activity line, if any.
    #[serde(default)]
    pub game: Option<Game>,
}

impl Presence {
    /// Presence with the given game and online status.
    #[must_use]
    pub fn with_game(game: Option<Game>) -> Self {
        Self {
            status: Status::Online,
            game,
        }
    }

    /// The gateway payload (`d`) for this presence.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let game = self.game.as_ref().map_or(Value::Null, |game| {
            let mut value = json!({
                "name": game.name,
                "type": game.kind.code(),
            });
            if let Some(url) = &game.url {
                value["url"] = Value::String(url.clone());
            }
            value
        });

        json!({
            "since": null,
            "game": game,
            "status": self.status.as_str(),
            "afk": false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_presence_payload() {
        let payload = Presence::default().to_payload();
        assert_eq!(payload["status"], "online");
        assert!(payload["game"].is_null());
        assert_eq!(payload["afk"], false);
    }

    #[test]
    fn test_playing_payload() {
        let payload = Presence::with_game(Some(Game::playing("chess"))).to_payload();
        assert_eq!(payload["game"]["name"], "chess");
        assert_eq!(payload["game"]["type"], 0);
        assert!(payload["game"].get("url").is_none());
    }

    #[test]
    fn test_streaming_payload() {
        let game = Game::streaming("speedrun", "https://twitch.tv/example");
        let payload = Presence::with_game(Some(game)).to_payload();
        assert_eq!(payload["game"]["type"], 1);
        assert_eq!(payload["game"]["url"], "https://twitch.tv/example");
    }

    #[test]
    fn test_status_deserializes_lowercase() {
        let presence: Presence = serde_json::from_str(r#"{"status":"dnd"}"#).unwrap();
        assert_eq!(presence.status, Status::Dnd);
        assert!(presence.game.is_none());
    }
}
