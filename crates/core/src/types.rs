//! Identifiers shared across the broker services.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Chat-level identity of an end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<i64> for UserId {
	fn from(value: i64) -> Self {
		Self(value)
	}
}

const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;

/// International phone number reduced to its digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
	/// Strips every non-digit and accepts the result when it has 10 to 15 digits.
	pub fn parse(input: &str) -> Option<Self> {
		let digits: String = input.chars().filter(char::is_ascii_digit).collect();
		(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS)
			.contains(&digits.len())
			.then_some(Self(digits))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// First three and last four digits, the rest replaced by `****`.
	pub fn masked(&self) -> String {
		mask_digits(&self.0)
	}
}

impl fmt::Display for PhoneNumber {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

pub(crate) fn mask_digits(digits: &str) -> String {
	if digits.len() < 7 || !digits.is_ascii() {
		return digits.to_string();
	}
	format!("{}****{}", &digits[..3], &digits[digits.len() - 4..])
}

const SESSION_ID_BYTES: usize = 8;

/// Opaque permanent session identifier: 16 upper-case hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	pub fn generate() -> Self {
		let bytes: [u8; SESSION_ID_BYTES] = rand::random();
		Self(bytes.iter().map(|b| format!("{b:02X}")).collect())
	}

	pub fn from_string(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
