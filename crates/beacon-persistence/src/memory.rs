// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Memory backend used when SQLite is unavailable.

use beacon_core::{LocalId, Log};
use std::collections::{BTreeMap, HashMap};

use crate::pending::PendingBatches;

#[derive(Debug, Default)]
pub(crate) struct MemoryBackend {
	groups: HashMap<String, BTreeMap<LocalId, Log>>,
	last_id: i64,
}

impl MemoryBackend {
	/// A backend whose first id is `last_id + 1`.
	pub(crate) fn starting_after(last_id: i64) -> Self {
		Self {
			groups: HashMap::new(),
			last_id,
		}
	}

	/// Stores `log` and evicts the oldest rows of `group` beyond `capacity`.
	pub(crate) fn insert(
		&mut self,
		group: &str,
		log: Log,
		capacity: usize,
	) -> (LocalId, Vec<LocalId>) {
		self.last_id += 1;
		let id = LocalId(self.last_id);
		let rows = self.groups.entry(group.to_string()).or_default();
		rows.insert(id, log);

		let mut evicted = Vec::new();
		while rows.len() > capacity {
			match rows.pop_first() {
				Some((old, _)) => evicted.push(old),
				None => break,
			}
		}
		(id, evicted)
	}

	/// Oldest rows of `group` that are not checked out, up to `limit`.
	pub(crate) fn eligible(
		&self,
		group: &str,
		limit: usize,
		pending: &PendingBatches,
	) -> Vec<(LocalId, Log)> {
		let Some(rows) = self.groups.get(group) else {
			return Vec::new();
		};
		rows
			.iter()
			.filter(|(id, _)| !pending.is_checked_out(**id))
			.take(limit)
			.map(|(id, log)| (*id, log.clone()))
			.collect()
	}

	pub(crate) fn delete(&mut self, group: &str, ids: &[LocalId]) {
		if let Some(rows) = self.groups.get_mut(group) {
			for id in ids {
				rows.remove(id);
			}
		}
	}

	pub(crate) fn delete_group(&mut self, group: &str) {
		self.groups.remove(group);
	}

	pub(crate) fn count(&self, group: &str) -> usize {
		self.groups.get(group).map(BTreeMap::len).unwrap_or(0)
	}

	pub(crate) fn last_id(&self) -> i64 {
		self.last_id
	}
}
