//! Canonical input identifiers.
//!
//! Every front end (keyboard hook, HID poller, speech recognizer) produces
//! free-form names. They are normalized here so that bindings compare equal
//! regardless of which front end produced them:
//!
//! - `KEY:<NAME>` keyboard key, uppercased, inner spaces as `_`
//! - `JOY:<device>:<button>` HID button, button number without leading zeros
//! - `VOICE:<phrase>` lowercased phrase with collapsed whitespace
//!
//! A bare name such as `F1` is read as a keyboard key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{InputError, InputResult};

/// Which front end produced an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Keyboard,
    Hid,
    Voice,
}

impl InputSource {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Keyboard => "KEY",
            Self::Hid => "JOY",
            Self::Voice => "VOICE",
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyboard => f.write_str("keyboard"),
            Self::Hid => f.write_str("hid"),
            Self::Voice => f.write_str("voice"),
        }
    }
}

/// A normalized input identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InputId {
    source: InputSource,
    name: String,
}

impl InputId {
    /// Keyboard key.
    pub fn key(name: &str) -> InputResult<Self> {
        let name = name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_uppercase();
        if name.is_empty() {
            return Err(InputError::invalid("KEY:"));
        }
        Ok(Self {
            source: InputSource::Keyboard,
            name,
        })
    }

    /// HID button on a device.
    pub fn hid(device: &str, button: &str) -> InputResult<Self> {
        let device = device.trim();
        let button = button.trim();
        let number: u32 = button
            .parse()
            .map_err(|_parse| InputError::invalid(format!("JOY:{device}:{button}")))?;
        if device.is_empty() || device.contains(char::is_whitespace) {
            return Err(InputError::invalid(format!("JOY:{device}:{button}")));
        }
        Ok(Self {
            source: InputSource::Hid,
            name: format!("{device}:{number}"),
        })
    }

    /// Recognized voice phrase.
    pub fn voice(phrase: &str) -> InputResult<Self> {
        let name = normalize_phrase(phrase);
        if name.is_empty() {
            return Err(InputError::invalid("VOICE:"));
        }
        Ok(Self {
            source: InputSource::Voice,
            name,
        })
    }

    /// Parse any accepted textual form.
    pub fn parse(raw: &str) -> InputResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(InputError::invalid(raw));
        }
        let Some((prefix, rest)) = raw.split_once(':') else {
            return Self::key(raw);
        };
        match prefix.trim().to_ascii_uppercase().as_str() {
            "KEY" | "KB" => Self::key(rest),
            "JOY" | "HID" => {
                let (device, button) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| InputError::invalid(raw))?;
                Self::hid(device, button)
            }
            "VOICE" | "SAY" => Self::voice(rest),
            _ => Err(InputError::invalid(raw)),
        }
    }

    pub fn source(&self) -> InputSource {
        self.source
    }

    /// Name without the source prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device part of a HID identifier.
    pub fn device(&self) -> Option<&str> {
        match self.source {
            InputSource::Hid => self.name.rsplit_once(':').map(|(device, _)| device),
            InputSource::Keyboard | InputSource::Voice => None,
        }
    }

    /// Voice inputs have no physical hold.
    pub fn is_instantaneous(&self) -> bool {
        self.source == InputSource::Voice
    }
}

/// Lowercase a phrase and collapse runs of whitespace.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.prefix(), self.name)
    }
}

impl FromStr for InputId {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InputId {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InputId> for String {
    fn from(value: InputId) -> Self {
        value.to_string()
    }
}
