//! `fenproto`: message types shared by fenmud services.
//!
//! The wire format is one JSON object per line. Every command and event
//! variant carries a stable string discriminator (`cmd` / `event`) so the
//! transport layer can route messages without knowing their payloads. Both
//! enums are closed: adding a variant is a protocol change and every
//! consumer matches exhaustively.

pub mod command;
pub mod event;

pub use command::ClientCommand;
pub use event::ServerEvent;

use serde::{Deserialize, Serialize};

/// Identifies one client connection for its whole lifetime.
///
/// Allocated by the transport on accept; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Short form for logs.
    pub fn short(self) -> u32 {
        (self.0 as u32) ^ ((self.0 >> 32) as u32)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{:08x}", self.short())
    }
}

/// Compass + vertical movement directions. The room graph is keyed on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl Direction {
    pub fn all() -> &'static [Direction] {
        &[
            Direction::North,
            Direction::South,
            Direction::East,
            Direction::West,
            Direction::Up,
            Direction::Down,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "north" | "n" => Some(Direction::North),
            "south" | "s" => Some(Direction::South),
            "east" | "e" => Some(Direction::East),
            "west" | "w" => Some(Direction::West),
            "up" | "u" => Some(Direction::Up),
            "down" | "d" => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coin denominations, smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denomination {
    Copper,
    Silver,
    Gold,
    Platinum,
}

impl Denomination {
    pub fn all() -> &'static [Denomination] {
        &[
            Denomination::Copper,
            Denomination::Silver,
            Denomination::Gold,
            Denomination::Platinum,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Denomination::Copper => "copper",
            Denomination::Silver => "silver",
            Denomination::Gold => "gold",
            Denomination::Platinum => "platinum",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "copper" | "cp" => Some(Denomination::Copper),
            "silver" | "sp" => Some(Denomination::Silver),
            "gold" | "gp" => Some(Denomination::Gold),
            "platinum" | "pp" => Some(Denomination::Platinum),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum DecodeError {
    Empty,
    TooLong { max: usize, got: usize },
    Json(serde_json::Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "empty command line"),
            DecodeError::TooLong { max, got } => {
                write!(f, "command line too long: {got} bytes (max {max})")
            }
            DecodeError::Json(e) => write!(f, "malformed command: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Longest command line the codec will accept.
pub const MAX_COMMAND_LINE: usize = 8 * 1024;

/// Parse one line of client input into a command.
pub fn decode_command(line: &str) -> Result<ClientCommand, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }
    if line.len() > MAX_COMMAND_LINE {
        return Err(DecodeError::TooLong {
            max: MAX_COMMAND_LINE,
            got: line.len(),
        });
    }
    serde_json::from_str(line).map_err(DecodeError::Json)
}

/// Serialize an event as one line, newline included.
pub fn encode_event(ev: &ServerEvent) -> String {
    // ServerEvent contains nothing that can fail to serialize.
    let mut s = serde_json::to_string(ev).unwrap_or_else(|_| "{\"event\":\"error\"}".to_string());
    s.push('\n');
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parses_aliases() {
        assert_eq!(Direction::parse("n"), Some(Direction::North));
        assert_eq!(Direction::parse("  SOUTH "), Some(Direction::South));
        assert_eq!(Direction::parse("u"), Some(Direction::Up));
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn decode_rejects_garbage_and_empty() {
        assert!(matches!(decode_command(""), Err(DecodeError::Empty)));
        assert!(matches!(decode_command("   "), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_command("not json"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn command_discriminators_are_stable() {
        let cmd = decode_command(r#"{"cmd":"move","dir":"north"}"#).unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::Move {
                dir: Direction::North
            }
        ));

        let cmd = decode_command(r#"{"cmd":"ping"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Ping));
    }

    #[test]
    fn event_roundtrips_through_one_line() {
        let line = encode_event(&ServerEvent::Pong);
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"event\":\"pong\""));
        assert_eq!(line.matches('\n').count(), 1);
    }
}
