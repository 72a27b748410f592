// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Telemetry records and the container sent to ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Properties;

/// A single telemetry record.
///
/// The store treats the serialized form as an opaque payload; only the
/// channel and the session decorator look inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
	#[serde(rename = "type")]
	pub log_type: String,
	pub id: Uuid,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<DateTime<Utc>>,
	#[serde(rename = "sid", default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<Uuid>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub properties: Map<String, Value>,
}

impl Log {
	pub fn new(log_type: impl Into<String>) -> Self {
		Self {
			log_type: log_type.into(),
			id: Uuid::now_v7(),
			timestamp: None,
			session_id: None,
			properties: Map::new(),
		}
	}

	pub fn with_properties(mut self, properties: Properties) -> Self {
		self.properties = properties.into_map();
		self
	}

	pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
		self.timestamp = Some(timestamp);
		self
	}

	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}

	pub fn from_json(json: &str) -> serde_json::Result<Self> {
		serde_json::from_str(json)
	}
}

/// Body of an ingestion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogContainer {
	pub logs: Vec<Log>,
}

impl LogContainer {
	pub fn new(logs: Vec<Log>) -> Self {
		Self { logs }
	}

	pub fn len(&self) -> usize {
		self.logs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.logs.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_log_wire_names() {
		let mut log = Log::new("event").with_properties(Properties::new().insert("name", "open"));
		log.session_id = Some(Uuid::now_v7());

		let value: Value = serde_json::from_str(&log.to_json().unwrap()).unwrap();
		assert_eq!(value["type"], "event");
		assert!(value.get("sid").is_some());
		assert!(value.get("timestamp").is_none());
		assert_eq!(value["properties"]["name"], "open");
	}

	#[test]
	fn test_log_parses_minimal_payload() {
		let id = Uuid::now_v7();
		let json = format!(r#"{{"type":"start_session","id":"{id}"}}"#);
		let log = Log::from_json(&json).unwrap();
		assert_eq!(log.log_type, "start_session");
		assert_eq!(log.id, id);
		assert!(log.session_id.is_none());
		assert!(log.properties.is_empty());
	}

	#[test]
	fn test_log_rejects_garbage() {
		assert!(Log::from_json("{not json").is_err());
		assert!(Log::from_json(r#"{"id":"x"}"#).is_err());
	}

	#[test]
	fn test_container_serializes_logs_array() {
		let container = LogContainer::new(vec![Log::new("a"), Log::new("b")]);
		let value = serde_json::to_value(&container).unwrap();
		assert_eq!(value["logs"].as_array().unwrap().len(), 2);
		assert_eq!(container.len(), 2);
	}
}
