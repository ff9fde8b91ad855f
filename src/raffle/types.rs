use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Amounts are tracked in wei
pub type Amount = u128;

/// Identifier the oracle assigns to a randomness request
pub type RequestId = u64;

/// Sequential round number, starting at 1
pub type RoundId = u64;

pub const WEI_PER_ETHER: Amount = 1_000_000_000_000_000_000;

const ETHER_DECIMALS: usize = 18;

/// Phase of the current round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoundState {
    /// Accepting entries
    Open,
    /// Randomness requested, waiting for the oracle
    Calculating,
}

impl RoundState {
    /// Numeric form, as exposed by `raffle_state` queries
    pub fn as_u8(self) -> u8 {
        match self {
            RoundState::Open => 0,
            RoundState::Calculating => 1,
        }
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::Open => write!(f, "OPEN"),
            RoundState::Calculating => write!(f, "CALCULATING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid ether amount: {0}")]
    InvalidAmount(String),
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped).map_err(|e| ParseError::InvalidHex(e.to_string()))?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ParseError::InvalidLength { expected: N, actual })
}

/// 20-byte account identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Address whose low 8 bytes hold `n` big-endian (handy for fixtures)
    pub fn from_low_u64(n: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<20>(s).map(Address)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 256-bit random value delivered by the oracle, big-endian
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RandomWord([u8; 32]);

impl RandomWord {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_u64(n: u64) -> Self {
        Self::from_u128(n as u128)
    }

    pub fn from_u128(n: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `self mod modulus` over the full 256 bits; zero when `modulus` is zero
    pub fn reduce(&self, modulus: u64) -> u64 {
        if modulus == 0 {
            return 0;
        }
        let m = modulus as u128;
        let rem = self
            .0
            .iter()
            .fold(0u128, |acc, byte| ((acc << 8) | *byte as u128) % m);
        rem as u64
    }
}

impl fmt::Display for RandomWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RandomWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for RandomWord {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s).map(RandomWord)
    }
}

impl Serialize for RandomWord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RandomWord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a decimal ether amount such as `"0.01"` into wei
pub fn parse_ether(s: &str) -> Result<Amount, ParseError> {
    let invalid = || ParseError::InvalidAmount(s.to_string());
    let (whole, frac) = s.trim().split_once('.').unwrap_or((s.trim(), ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if frac.len() > ETHER_DECIMALS || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let frac_wei: Amount = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = ETHER_DECIMALS);
        padded.parse().map_err(|_| invalid())?
    };

    whole
        .checked_mul(WEI_PER_ETHER)
        .and_then(|w| w.checked_add(frac_wei))
        .ok_or_else(invalid)
}

/// Render wei as a decimal ether string, trimming trailing zeros
pub fn format_ether(amount: Amount) -> String {
    let whole = amount / WEI_PER_ETHER;
    let frac = amount % WEI_PER_ETHER;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:018}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_parse() {
        let addr = Address::from_low_u64(0xabcd);
        let text = addr.to_string();
        assert_eq!(text, "0x000000000000000000000000000000000000abcd");
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        let err = "0x1234".parse::<Address>().unwrap_err();
        assert_eq!(err, ParseError::InvalidLength { expected: 20, actual: 2 });
    }

    #[test]
    fn test_reduce_small_values() {
        assert_eq!(RandomWord::from_u64(10).reduce(3), 1);
        assert_eq!(RandomWord::from_u64(9).reduce(3), 0);
        assert_eq!(RandomWord::from_u64(5).reduce(0), 0);
    }

    #[test]
    fn test_reduce_uses_all_256_bits() {
        // 2^255 mod 7: 2^3 = 1 (mod 7), 255 = 3 * 85, so 2^255 = 1 (mod 7)
        let mut bytes = [0u8; 32];
        bytes[0] = 0x80;
        assert_eq!(RandomWord::from_bytes(bytes).reduce(7), 1);

        // 2^256 - 1 mod 3 = 0 since 2^256 = 1 (mod 3)
        assert_eq!(RandomWord::from_bytes([0xff; 32]).reduce(3), 0);
    }

    #[test]
    fn test_round_state_numeric_form() {
        assert_eq!(RoundState::Open.as_u8(), 0);
        assert_eq!(RoundState::Calculating.as_u8(), 1);
        assert_eq!(RoundState::Calculating.to_string(), "CALCULATING");
    }

    #[test]
    fn test_parse_and_format_ether() {
        assert_eq!(parse_ether("0.01").unwrap(), 10_000_000_000_000_000);
        assert_eq!(parse_ether("1").unwrap(), WEI_PER_ETHER);
        assert_eq!(parse_ether(".5").unwrap(), WEI_PER_ETHER / 2);
        assert!(parse_ether("0.0000000000000000001").is_err());
        assert!(parse_ether("abc").is_err());

        assert_eq!(format_ether(10_000_000_000_000_000), "0.01");
        assert_eq!(format_ether(2 * WEI_PER_ETHER), "2");
    }
}
