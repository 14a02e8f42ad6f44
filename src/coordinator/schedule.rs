//! Min-heap schedule driving proactive refreshes.

// std
use std::{cmp::Reverse, collections::BinaryHeap};
// self
use crate::{_prelude::*, auth::AccountId};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduleEntry {
	due_at: OffsetDateTime,
	account: AccountId,
}

#[derive(Debug, Default)]
struct ScheduleInner {
	heap: BinaryHeap<Reverse<ScheduleEntry>>,
	due_index: HashMap<AccountId, OffsetDateTime>,
}

/// Process-local `(account, due_at)` queue: one heap instead of one timer per account.
///
/// Rescheduling an account overwrites its due instant in the index; the heap keeps the
/// superseded entry until it surfaces and is discarded on pop, so pushes stay O(log n).
#[derive(Clone, Debug, Default)]
pub struct RefreshSchedule(Arc<Mutex<ScheduleInner>>);
impl RefreshSchedule {
	/// Registers (or reschedules) the account to be refreshed at `due_at`.
	pub fn schedule(&self, account: AccountId, due_at: OffsetDateTime) {
		let mut inner = self.0.lock();

		inner.due_index.insert(account.clone(), due_at);
		inner.heap.push(Reverse(ScheduleEntry { due_at, account }));
	}

	/// Returns `true` while the account has a pending schedule entry.
	pub fn contains(&self, account: &AccountId) -> bool {
		self.0.lock().due_index.contains_key(account)
	}

	/// Earliest pending due instant, if any entry is scheduled.
	pub fn next_due(&self) -> Option<OffsetDateTime> {
		let mut inner = self.0.lock();

		Self::discard_stale(&mut inner);

		inner.heap.peek().map(|Reverse(entry)| entry.due_at)
	}

	/// Removes and returns every account whose due instant has passed.
	pub fn drain_due(&self, now: OffsetDateTime) -> Vec<AccountId> {
		let mut inner = self.0.lock();
		let mut due = Vec::new();

		loop {
			Self::discard_stale(&mut inner);

			let head_due =
				matches!(inner.heap.peek(), Some(Reverse(entry)) if entry.due_at <= now);

			if !head_due {
				break;
			}
			if let Some(Reverse(entry)) = inner.heap.pop() {
				inner.due_index.remove(&entry.account);
				due.push(entry.account);
			}
		}

		due
	}

	/// Number of scheduled accounts.
	pub fn len(&self) -> usize {
		self.0.lock().due_index.len()
	}

	/// Returns `true` when nothing is scheduled.
	pub fn is_empty(&self) -> bool {
		self.0.lock().due_index.is_empty()
	}

	fn discard_stale(inner: &mut ScheduleInner) {
		while let Some(Reverse(entry)) = inner.heap.peek() {
			let live = inner
				.due_index
				.get(&entry.account)
				.is_some_and(|current| *current == entry.due_at);

			if live {
				break;
			}

			inner.heap.pop();
		}
	}
}
