use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which register contributes the high-order half of the 32-bit value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WordOrder {
    #[default]
    Big,
    Little,
}

/// Which byte of a single register is most significant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} order {value:?} (expected \"big\" or \"little\")")]
pub struct ParseOrderError {
    kind: &'static str,
    value: String,
}

fn parse_order(kind: &'static str, raw: &str) -> Result<bool, ParseOrderError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "big" => Ok(true),
        "little" => Ok(false),
        _ => Err(ParseOrderError {
            kind,
            value: raw.to_string(),
        }),
    }
}

impl FromStr for WordOrder {
    type Err = ParseOrderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_order("word", raw).map(|big| if big { Self::Big } else { Self::Little })
    }
}

impl FromStr for ByteOrder {
    type Err = ParseOrderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_order("byte", raw).map(|big| if big { Self::Big } else { Self::Little })
    }
}

impl fmt::Display for WordOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Big => "big",
            Self::Little => "little",
        })
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Big => "big",
            Self::Little => "little",
        })
    }
}

fn register_bytes(word: u16, byte_order: ByteOrder) -> [u8; 2] {
    match byte_order {
        ByteOrder::Big => word.to_be_bytes(),
        ByteOrder::Little => word.to_le_bytes(),
    }
}

/// Combines two holding registers into a signed 32-bit value.
///
/// Each register is split into bytes per `byte_order`, the two byte groups
/// are concatenated per `word_order`, and the resulting buffer is read as a
/// big-endian two's-complement integer. Every input pair is valid.
pub fn decode_i32(r0: u16, r1: u16, byte_order: ByteOrder, word_order: WordOrder) -> i32 {
    let first = register_bytes(r0, byte_order);
    let second = register_bytes(r1, byte_order);
    let (high, low) = match word_order {
        WordOrder::Big => (first, second),
        WordOrder::Little => (second, first),
    };
    i32::from_be_bytes([high[0], high[1], low[0], low[1]])
}
