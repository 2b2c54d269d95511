//! Output routing mode and text encodings for the managed process's log.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Where the managed process's output streams are routed.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogDestination {
    /// Line-prefixed pass-through to the invoking console.
    #[default]
    Console,
    /// All streams interleaved into one shared log file.
    File,
    /// Discard everything.
    None,
}

/// Text encodings accepted for the shared log file and for script sources.
///
/// The pack carries no transcoding crate, so the supported labels are the
/// ones expressible with std primitives alone.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum LogEncoding {
    #[default]
    #[strum(serialize = "utf-8", serialize = "utf8")]
    Utf8,
    #[strum(serialize = "utf-16le", serialize = "utf16le")]
    Utf16Le,
    #[strum(serialize = "utf-16be", serialize = "utf16be")]
    Utf16Be,
    #[strum(serialize = "latin-1", serialize = "latin1", serialize = "iso-8859-1")]
    Latin1,
}

/// Errors raised while decoding or encoding text in a configured encoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("byte stream is not valid {encoding}")]
    InvalidInput { encoding: LogEncoding },
    #[error("character {character:?} cannot be represented in {encoding}")]
    Unrepresentable {
        character: char,
        encoding: LogEncoding,
    },
}

impl LogEncoding {
    /// Encodes a text block for writing to the log file.
    pub fn encode(self, text: &str) -> Result<Vec<u8>, EncodingError> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Utf16Le => Ok(text
                .encode_utf16()
                .flat_map(u16::to_le_bytes)
                .collect()),
            Self::Utf16Be => Ok(text
                .encode_utf16()
                .flat_map(u16::to_be_bytes)
                .collect()),
            Self::Latin1 => text
                .chars()
                .map(|character| {
                    u8::try_from(u32::from(character)).map_err(|_| {
                        EncodingError::Unrepresentable {
                            character,
                            encoding: self,
                        }
                    })
                })
                .collect(),
        }
    }

    /// Decodes a complete byte stream read from a script file.
    pub fn decode(self, bytes: &[u8]) -> Result<String, EncodingError> {
        match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|_| EncodingError::InvalidInput { encoding: self }),
            Self::Utf16Le => decode_utf16_with(bytes, u16::from_le_bytes, self),
            Self::Utf16Be => decode_utf16_with(bytes, u16::from_be_bytes, self),
            Self::Latin1 => Ok(bytes.iter().map(|&byte| char::from(byte)).collect()),
        }
    }
}

fn decode_utf16_with(
    bytes: &[u8],
    combine: fn([u8; 2]) -> u16,
    encoding: LogEncoding,
) -> Result<String, EncodingError> {
    if bytes.len() % 2 != 0 {
        return Err(EncodingError::InvalidInput { encoding });
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| combine([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| EncodingError::InvalidInput { encoding })
}
