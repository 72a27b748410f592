// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Identifiers assigned by the local store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Row identifier assigned by the store on insert.
///
/// Strictly increasing per store instance and never reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(pub i64);

impl fmt::Display for LocalId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<i64> for LocalId {
	fn from(value: i64) -> Self {
		Self(value)
	}
}

/// Token naming a checked-out batch.
///
/// Generated from a UUIDv7 so tokens sort in creation order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(String);

impl BatchId {
	pub fn new() -> Self {
		Self(Uuid::now_v7().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for BatchId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for BatchId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for BatchId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl From<&str> for BatchId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

/// Where a record's payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
	/// Payload stored inline in the row.
	Normal,
	/// Payload stored in a sidecar file, the row keeps a reference.
	Large,
}

impl SizeClass {
	pub fn as_str(&self) -> &'static str {
		match self {
			SizeClass::Normal => "normal",
			SizeClass::Large => "large",
		}
	}
}

impl fmt::Display for SizeClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSizeClass(pub String);

impl fmt::Display for UnknownSizeClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "unknown size class: {}", self.0)
	}
}

impl std::error::Error for UnknownSizeClass {}

impl FromStr for SizeClass {
	type Err = UnknownSizeClass;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"normal" => Ok(SizeClass::Normal),
			"large" => Ok(SizeClass::Large),
			other => Err(UnknownSizeClass(other.to_string())),
		}
	}
}
