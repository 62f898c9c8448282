//! Identifier newtypes for servers, plugin instances, ban lists and players.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors produced when parsing or validating identifiers.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// The value was not a valid UUID
    #[error("Malformed UUID: {0}")]
    MalformedUuid(#[from] uuid::Error),
    /// The value was not a valid 64-bit Steam id
    #[error("Malformed Steam id: {0}")]
    MalformedSteamId(String),
    /// The value was not a valid EOS id
    #[error("Malformed EOS id: {0}")]
    MalformedEosId(String),
}

/// Unique identifier for a managed game server.
///
/// This is a wrapper around UUID that provides type safety and ensures
/// server IDs cannot be confused with other kinds of IDs in the system.
///
/// # Examples
///
/// ```rust
/// use aegis_types::ServerId;
///
/// let server_id = ServerId::new();
/// println!("Server: {}", server_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub Uuid);

impl ServerId {
    /// Creates a new random server ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for ServerId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a plugin instance bound to one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Creates a new random instance ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for InstanceId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a named ban list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BanListId(pub Uuid);

impl BanListId {
    /// Creates a new random ban list ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BanListId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for BanListId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl std::fmt::Display for BanListId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 64-bit Steam account identifier.
///
/// Steam ids on the wire are 17-digit decimal strings; internally they are
/// plain `u64` values so they can be stored as `BIGINT` columns and compared
/// cheaply.
///
/// # Examples
///
/// ```rust
/// use aegis_types::SteamId;
///
/// let id: SteamId = "76561198012345678".parse()?;
/// assert_eq!(id.to_string(), "76561198012345678");
/// # Ok::<(), aegis_types::TypeError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SteamId(pub u64);

impl SteamId {
    /// Wraps a raw 64-bit Steam id.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::str::FromStr for SteamId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TypeError::MalformedSteamId(s.to_string()));
        }
        trimmed
            .parse::<u64>()
            .map(Self)
            .map_err(|_| TypeError::MalformedSteamId(s.to_string()))
    }
}

impl std::fmt::Display for SteamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 32-character alphanumeric Epic Online Services account identifier.
///
/// EOS ids arrive in RCON broadcast text and log streams; they are validated
/// on construction so malformed fragments never reach the identity tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EosId(String);

impl EosId {
    /// Validates and wraps an EOS id string.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::MalformedEosId`] unless the input is exactly
    /// 32 ASCII alphanumeric characters.
    pub fn new(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        if raw.len() == 32 && raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Ok(Self(raw))
        } else {
            Err(TypeError::MalformedEosId(raw))
        }
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for EosId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for EosId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steam_id_parses_decimal() {
        let id: SteamId = "76561198012345678".parse().unwrap();
        assert_eq!(id.raw(), 76561198012345678);
    }

    #[test]
    fn steam_id_rejects_garbage() {
        assert!("not-a-steam-id".parse::<SteamId>().is_err());
        assert!("".parse::<SteamId>().is_err());
        assert!("7656119801234567x".parse::<SteamId>().is_err());
    }

    #[test]
    fn eos_id_requires_32_alphanumeric() {
        assert!(EosId::new("0002a10186d9414496bf20d22d3860ba").is_ok());
        assert!(EosId::new("too-short").is_err());
        assert!(EosId::new("0002a10186d9414496bf20d22d3860b!").is_err());
    }

    #[test]
    fn server_id_round_trips_through_display() {
        let id = ServerId::new();
        let parsed: ServerId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
