//! Normalises free-form MongoDB version strings into distribution
//! identifiers.
//!
//! The download machinery selects a binary release from the enumerated
//! identifier. Users write versions the way they think about them
//! (`2.2.1`, `v3.6.22`, `V4_0_12`); normalisation upper-cases the input,
//! swaps dots for underscores, and prepends the `V` marker when missing.
//! Unknown versions are carried through verbatim and attempted anyway —
//! they are usually releases newer than this enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Enumerated distribution identifiers for known MongoDB releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
pub enum KnownVersion {
    V2_2_1,
    V2_6_10,
    V3_2_20,
    V3_4_15,
    V3_6_22,
    V4_0_12,
    V4_2_22,
    V4_4_13,
    V5_0_6,
    V6_0_1,
}

/// A resolved MongoDB version: a known distribution identifier or a
/// free-form version the distribution cache may still be able to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MongoVersion {
    Known(KnownVersion),
    Custom(String),
}

impl MongoVersion {
    /// Parses a free-form version string into a distribution identifier.
    ///
    /// Unrecognised versions are not rejected; they come back as
    /// [`MongoVersion::Custom`] and the caller decides how loudly to warn.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let normalised = Self::normalise(input);
        match KnownVersion::from_str(&normalised) {
            Ok(known) => Self::Known(known),
            Err(_) => Self::Custom(input.trim().to_owned()),
        }
    }

    fn normalise(input: &str) -> String {
        let mut name = input.trim().to_uppercase().replace('.', "_");
        if !name.starts_with('V') {
            name.insert(0, 'V');
        }
        name
    }

    /// Whether the version matched a known distribution identifier.
    #[must_use]
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    /// The dotted form used when composing download paths and cache keys,
    /// e.g. `V2_2_1` → `2.2.1`.
    #[must_use]
    pub fn dotted(&self) -> String {
        match self {
            Self::Known(known) => {
                let text = known.to_string();
                text.trim_start_matches('V').replace('_', ".")
            }
            Self::Custom(raw) => raw
                .trim_start_matches(['v', 'V'])
                .replace('_', "."),
        }
    }
}

impl fmt::Display for MongoVersion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(known) => write!(formatter, "{known}"),
            Self::Custom(raw) => formatter.write_str(raw),
        }
    }
}

impl Serialize for MongoVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.dotted())
    }
}

impl<'de> Deserialize<'de> for MongoVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}
