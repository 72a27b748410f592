// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! In-memory record of which rows are checked out in which batch.
//!
//! Nothing here is persisted. After a restart the tracker is empty, so the
//! store's checkout state must be cleared together with it.

use beacon_core::{BatchId, LocalId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct PendingBatches {
	batches: HashMap<String, HashMap<BatchId, Vec<LocalId>>>,
	checked_out: HashSet<LocalId>,
}

impl PendingBatches {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records `ids` as the contents of `batch_id` and marks them checked out.
	pub fn add(&mut self, group: &str, batch_id: BatchId, ids: Vec<LocalId>) {
		self.checked_out.extend(ids.iter().copied());
		self
			.batches
			.entry(group.to_string())
			.or_default()
			.insert(batch_id, ids);
	}

	/// Forgets a batch and returns the ids it held.
	pub fn remove(&mut self, group: &str, batch_id: &BatchId) -> Option<Vec<LocalId>> {
		let group_batches = self.batches.get_mut(group)?;
		let ids = group_batches.remove(batch_id)?;
		if group_batches.is_empty() {
			self.batches.remove(group);
		}
		for id in &ids {
			self.checked_out.remove(id);
		}
		Some(ids)
	}

	/// Forgets every batch of `group`, returning how many were dropped.
	pub fn remove_group(&mut self, group: &str) -> usize {
		let Some(group_batches) = self.batches.remove(group) else {
			return 0;
		};
		for id in group_batches.values().flatten() {
			self.checked_out.remove(id);
		}
		group_batches.len()
	}

	pub fn clear(&mut self) {
		self.batches.clear();
		self.checked_out.clear();
	}

	pub fn is_checked_out(&self, id: LocalId) -> bool {
		self.checked_out.contains(&id)
	}

	/// Number of rows of `group` currently checked out.
	pub fn checked_out_in_group(&self, group: &str) -> usize {
		self
			.batches
			.get(group)
			.map(|b| b.values().map(Vec::len).sum())
			.unwrap_or(0)
	}

	/// Number of unresolved batches for `group`.
	pub fn batch_count(&self, group: &str) -> usize {
		self.batches.get(group).map(HashMap::len).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.batches.is_empty()
	}
}
