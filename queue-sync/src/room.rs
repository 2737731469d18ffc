//! Room codes and peer identities.
//!
//! A room is addressed by a short human-readable code (`SNIPER42`). The host
//! of a room registers with the rendezvous service under an identity derived
//! from that code, so a client only needs the code to find it:
//!
//! ```text
//!   "  Sniper42 "  ──normalize──►  RoomId("sniper42")  ──derive──►  PeerId("queue-room-sniper42")
//! ```
//!
//! Normalization is trim + ASCII lower-case, so every spelling of a code maps
//! to the same host identity. There is no uniqueness check when generating a
//! code: a collision surfaces as a registration failure for the host identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix of every derived host identity.
pub const HOST_IDENTITY_PREFIX: &str = "queue-room-";

/// Longest accepted room code (after trimming).
pub const MAX_ROOM_ID_LEN: usize = 32;

/// Words used for generated room codes.
pub const THEME_WORDS: &[&str] = &[
    "CHICKEN", "DINNER", "SQUAD", "ROYALE", "SNIPER",
    "HELMET", "FRYING", "AIRDROP", "WINNER", "ERANGEL",
    "MIRAMAR", "SANHOK", "VIKENDI", "TAEGO", "PARAMO",
    "BRIDGE", "POCHINKI", "SCHOOL", "MILITARY", "GEORGOPOL",
    "MYLTA", "ROZHOK", "GATKA", "ZHARKI", "SHELTER",
    "GHILLIE", "MEDKIT", "BOOSTER", "REDZONE", "BLUEZONE",
];

/// Identity of a peer on the rendezvous service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh anonymous identity, as handed out to joining clients.
    pub fn anonymous() -> Self {
        Self(format!("peer-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identity has the shape of a derived host identity.
    pub fn is_host_identity(&self) -> bool {
        self.0.starts_with(HOST_IDENTITY_PREFIX)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized, case-insensitive room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Parse user input: trims whitespace and folds to lower-case.
    pub fn parse(input: &str) -> Result<Self, RoomIdError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if trimmed.len() > MAX_ROOM_ID_LEN {
            return Err(RoomIdError::TooLong(trimmed.len()));
        }
        if let Some(c) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(RoomIdError::InvalidCharacter(c));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Generate a random code: theme word plus two-digit suffix.
    pub fn generate() -> Self {
        Self::from_entropy(Uuid::new_v4().as_u128())
    }

    /// Deterministic code for the given entropy (same input, same code).
    pub fn from_entropy(entropy: u128) -> Self {
        let word = THEME_WORDS[(entropy % THEME_WORDS.len() as u128) as usize];
        let suffix = 10 + ((entropy >> 64) % 90) as u8;
        Self(format!("{}{suffix}", word.to_ascii_lowercase()))
    }

    /// Normalized form, used for identity derivation and persistence.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upper-case form for sharing with people.
    pub fn display_code(&self) -> String {
        self.0.to_ascii_uppercase()
    }

    /// Identity the host of this room registers under.
    ///
    /// Pure function of the normalized code.
    pub fn host_identity(&self) -> PeerId {
        PeerId(format!("{HOST_IDENTITY_PREFIX}{}", self.0))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_code())
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

/// Rejected room code input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomIdError {
    Empty,
    TooLong(usize),
    InvalidCharacter(char),
}

impl fmt::Display for RoomIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Room code is empty"),
            Self::TooLong(len) => {
                write!(f, "Room code is {len} characters, limit is {MAX_ROOM_ID_LEN}")
            }
            Self::InvalidCharacter(c) => write!(f, "Room code contains invalid character {c:?}"),
        }
    }
}

impl std::error::Error for RoomIdError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        let a = RoomId::parse("SNIPER42").unwrap();
        let b = RoomId::parse("sniper42 ").unwrap();
        let c = RoomId::parse("  SnIpEr42\t").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_str(), "sniper42");
    }

    #[test]
    fn test_host_identity_deterministic() {
        let host = RoomId::parse("SNIPER42").unwrap().host_identity();
        let client = RoomId::parse("sniper42 ").unwrap().host_identity();
        assert_eq!(host, client);
        assert_eq!(host.as_str(), "queue-room-sniper42");
        assert!(host.is_host_identity());
    }

    #[test]
    fn test_distinct_rooms_distinct_hosts() {
        let a = RoomId::parse("squad10").unwrap().host_identity();
        let b = RoomId::parse("squad11").unwrap().host_identity();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(RoomId::parse("   "), Err(RoomIdError::Empty));
        assert_eq!(RoomId::parse(""), Err(RoomIdError::Empty));
        assert_eq!(
            RoomId::parse("room 42"),
            Err(RoomIdError::InvalidCharacter(' '))
        );
        assert!(matches!(
            RoomId::parse(&"x".repeat(MAX_ROOM_ID_LEN + 1)),
            Err(RoomIdError::TooLong(_))
        ));
    }

    #[test]
    fn test_generated_code_shape() {
        for entropy in [0u128, 1, 29, 30, u128::MAX, 0xDEAD_BEEF << 64] {
            let id = RoomId::from_entropy(entropy);
            let code = id.display_code();
            let (word, digits) = code.split_at(code.len() - 2);
            assert!(THEME_WORDS.contains(&word), "unexpected word in {code}");
            let n: u8 = digits.parse().unwrap();
            assert!((10..=99).contains(&n), "suffix {n} not two digits");
            // Generated codes always survive their own normalization.
            assert_eq!(RoomId::parse(&code).unwrap(), id);
        }
    }

    #[test]
    fn test_from_entropy_stable() {
        assert_eq!(RoomId::from_entropy(12345), RoomId::from_entropy(12345));
    }

    #[test]
    fn test_display_is_upper_case() {
        let id = RoomId::parse("medkit77").unwrap();
        assert_eq!(id.to_string(), "MEDKIT77");
    }

    #[test]
    fn test_serde_uses_normalized_string() {
        let id = RoomId::parse("Bridge12").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"bridge12\"");
        let back: RoomId = serde_json::from_str("\" BRIDGE12 \"").unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<RoomId>("\"\"").is_err());
    }

    #[test]
    fn test_anonymous_peers_unique() {
        let a = PeerId::anonymous();
        let b = PeerId::anonymous();
        assert_ne!(a, b);
        assert!(!a.is_host_identity());
    }
}
