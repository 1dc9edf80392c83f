//! Join codes: the short token a user types on their phone to reach this bridge.
//!
//! The relay service pairs a remote controller with a bridge when both
//! register under the same code.  Codes are read aloud and typed by hand, so
//! generated codes avoid characters that are easy to confuse (`0`/`O` and
//! `1`/`I`).
//!
//! Codes supplied by the user are accepted more liberally (any ASCII letters
//! and digits) because the user already knows what they typed.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use thiserror::Error;

/// Characters used for generated codes.  Excludes `0`, `1`, `I`, and `O`.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a generated code.
pub const GENERATED_CODE_LEN: usize = 8;

/// Shortest code the relay accepts.
pub const MIN_CODE_LEN: usize = 4;

/// Longest code the relay accepts.
pub const MAX_CODE_LEN: usize = 12;

/// Why a user-supplied code was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinCodeError {
    #[error("join code must be 4-12 characters, got {0}")]
    BadLength(usize),

    #[error("join code may only contain letters and digits, found {0:?}")]
    BadCharacter(char),
}

/// A validated, upper-case join code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinCode(String);

impl JoinCode {
    /// Generates a fresh random code from [`JOIN_CODE_ALPHABET`].
    ///
    /// Repeated calls are not guaranteed to be unique; the relay rejects a
    /// second host registering under a code that is already taken.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::rng())
    }

    /// Generates a code using the supplied random source.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..GENERATED_CODE_LEN)
            .map(|_| char::from(JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())]))
            .collect();
        Self(code)
    }

    /// Normalises and validates a code typed by the user.
    ///
    /// Surrounding whitespace is trimmed and letters are upper-cased.
    ///
    /// # Errors
    ///
    /// Returns [`JoinCodeError`] if the code is too short, too long, or
    /// contains anything other than ASCII letters and digits.
    pub fn parse(input: &str) -> Result<Self, JoinCodeError> {
        let code = input.trim().to_ascii_uppercase();
        let len = code.chars().count();
        if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&len) {
            return Err(JoinCodeError::BadLength(len));
        }
        if let Some(bad) = code.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(JoinCodeError::BadCharacter(bad));
        }
        Ok(Self(code))
    }

    /// The code as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for JoinCode {
    type Err = JoinCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
