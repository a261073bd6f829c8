use std::{fmt::Display, num::ParseIntError, str::FromStr};

/// Errors produced while parsing a human readable byte quantity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ByteCountParseError {
    #[error("empty size")]
    Empty,
    #[error("invalid number '{0}': {1}")]
    InvalidNumber(String, ParseIntError),
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),
    #[error("size '{0}' does not fit in 64 bits")]
    Overflow(String),
}

/// A quantity of bytes.
///
/// Parses from plain integers and from strings with an optional unit. Single
/// letter units and IEC units (`KiB`, `MiB`, ...) are powers of 1024, SI units
/// (`KB`, `MB`, ...) are powers of 1000. Units are case insensitive and may be
/// separated from the number by whitespace, so `"10 GiB"`, `"8g"` and
/// `"256MiB"` are all accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteCount(pub u64);

impl From<u64> for ByteCount {
    fn from(x: u64) -> Self {
        ByteCount(x)
    }
}

fn unit_factor(unit: &str) -> Option<u128> {
    Some(match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kib" => 1 << 10,
        "m" | "mib" => 1 << 20,
        "g" | "gib" => 1 << 30,
        "t" | "tib" => 1 << 40,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        _ => return None,
    })
}

impl ByteCount {
    pub fn bytes(self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, other: ByteCount) -> ByteCount {
        ByteCount(self.0.saturating_sub(other.0))
    }

    pub fn to_human_readable(&self) -> String {
        match self.0.trailing_zeros() {
            _ if self.0 == 0 => "0".to_owned(),
            0..=9 => format!("{}", self.0),
            10..=19 => format!("{}K", self.0 >> 10),
            20..=29 => format!("{}M", self.0 >> 20),
            30..=39 => format!("{}G", self.0 >> 30),
            _ => format!("{}T", self.0 >> 40),
        }
    }

    pub fn from_human_readable(s: &str) -> Result<Self, ByteCountParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ByteCountParseError::Empty);
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let factor =
            unit_factor(unit.trim()).ok_or_else(|| ByteCountParseError::UnknownUnit(unit.into()))?;

        let parse = |digits: &str| {
            digits
                .parse::<u128>()
                .map_err(|e| ByteCountParseError::InvalidNumber(number.into(), e))
        };

        // Fractions are only meaningful with a unit, the result is truncated
        // to whole bytes.
        let total = match number.split_once('.') {
            Some((whole, fraction)) => {
                let scale = 10u128
                    .checked_pow(fraction.len() as u32)
                    .ok_or_else(|| ByteCountParseError::Overflow(s.into()))?;
                let fraction = if fraction.is_empty() {
                    0
                } else {
                    parse(fraction)?
                };
                parse(whole)? * factor + fraction * factor / scale
            }
            None => parse(number)? * factor,
        };

        u64::try_from(total)
            .map(ByteCount)
            .map_err(|_| ByteCountParseError::Overflow(s.into()))
    }
}

impl Display for ByteCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

impl FromStr for ByteCount {
    type Err = ByteCountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_human_readable(s)
    }
}

impl<'de> serde::Deserialize<'de> for ByteCount {
    fn deserialize<D>(deserializer: D) -> Result<ByteCount, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Size may be provided as a string (e.g. "10 GiB") or as a pure number
        // (e.g. 1024). Serde forces a number when only digits are provided, so
        // we need to deserialize as a generic value and then check the type.
        let value = serde_yaml::Value::deserialize(deserializer)?;

        match value {
            serde_yaml::Value::String(s) => ByteCount::from_str(s.as_str())
                .map_err(|e| serde::de::Error::custom(format!("invalid byte count size: {e}"))),
            serde_yaml::Value::Number(n) => {
                let n = n.as_u64().ok_or_else(|| {
                    serde::de::Error::custom("invalid byte count size, expected unsigned integer")
                })?;
                Ok(ByteCount(n))
            }
            _ => Err(serde::de::Error::custom("invalid byte count size")),
        }
    }
}

impl serde::Serialize for ByteCount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.0 & 0x3FF != 0 {
            serializer.serialize_u64(self.0)
        } else {
            serializer.serialize_str(self.to_human_readable().as_str())
        }
    }
}

/// Serde helpers for optional sizes, where null, an empty string and zero all
/// mean "no size requested".
pub mod optional {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::ByteCount;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<ByteCount>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        match value {
            serde_yaml::Value::Null => Ok(None),
            serde_yaml::Value::String(ref s) if s.trim().is_empty() => Ok(None),
            other => {
                let size = ByteCount::deserialize(other).map_err(serde::de::Error::custom)?;
                Ok((size.0 != 0).then_some(size))
            }
        }
    }

    pub fn serialize<S>(value: &Option<ByteCount>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(size) => serializer.serialize_some(size),
            None => serializer.serialize_none(),
        }
    }
}
