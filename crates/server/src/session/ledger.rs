// Bounded answer buffer for the current question.
//
// Ring semantics: once full, the oldest entry is overwritten and the running
// total keeps counting. The buffer is scoped to one question and must be
// cleared on every question transition; duplicate detection relies on it.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One recorded answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub player_id: Uuid,
    /// Index of the chosen answer option.
    pub option_index: usize,
    /// Server receive time after latency compensation and 50 ms bucketing.
    pub bucketed_at: DateTime<Utc>,
    /// Milliseconds relative to the question start.
    pub response_time_ms: i64,
}

/// Fixed-capacity overwrite-on-full answer buffer.
#[derive(Debug)]
pub struct AnswerLedger {
    entries: Vec<AnswerRecord>,
    capacity: usize,
    /// Next slot to overwrite once the buffer is full.
    write_cursor: usize,
    /// Total answers ever pushed, independent of buffer occupancy.
    total_submitted: u64,
}

impl AnswerLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity.min(1024)),
            capacity,
            write_cursor: 0,
            total_submitted: 0,
        }
    }

    /// Append an answer; overwrites the oldest entry when full.
    pub fn push(&mut self, record: AnswerRecord) {
        if self.entries.len() < self.capacity {
            self.entries.push(record);
            self.write_cursor = self.entries.len() % self.capacity;
        } else {
            self.entries[self.write_cursor] = record;
            self.write_cursor = (self.write_cursor + 1) % self.capacity;
        }
        self.total_submitted += 1;
    }

    /// Linear scan; per-question population is bounded by `max_players` and
    /// the buffer is cleared every question, so this stays cheap.
    pub fn has_answered(&self, player_id: Uuid) -> bool {
        self.entries.iter().any(|record| record.player_id == player_id)
    }

    /// Drop every entry for `player_id` (hard player removal). Returns the
    /// number of entries removed.
    pub fn purge_player(&mut self, player_id: Uuid) -> usize {
        let before = self.entries.len();
        self.entries.retain(|record| record.player_id != player_id);
        let removed = before - self.entries.len();
        if removed > 0 {
            // Compaction loses ring positioning; restart the cursor at the
            // tail so future overwrites still hit the oldest region.
            self.write_cursor = self.entries.len() % self.capacity;
        }
        removed
    }

    /// Clear for the next question. Resets occupancy but not `total_submitted`.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.write_cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_submitted(&self) -> u64 {
        self.total_submitted
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnswerRecord> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::{AnswerLedger, AnswerRecord};

    fn record(player_id: Uuid, response_time_ms: i64) -> AnswerRecord {
        AnswerRecord {
            player_id,
            option_index: 0,
            bucketed_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
            response_time_ms,
        }
    }

    #[test]
    fn push_and_duplicate_detection() {
        let mut ledger = AnswerLedger::new(10);
        let player = Uuid::new_v4();
        assert!(!ledger.has_answered(player));

        ledger.push(record(player, 500));
        assert!(ledger.has_answered(player));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.total_submitted(), 1);
    }

    #[test]
    fn size_never_exceeds_capacity_under_heavy_volume() {
        let mut ledger = AnswerLedger::new(8);
        for i in 0..20 {
            ledger.push(record(Uuid::new_v4(), i));
        }
        assert_eq!(ledger.len(), 8);
        assert_eq!(ledger.total_submitted(), 20);
    }

    #[test]
    fn overwrite_replaces_the_oldest_entry() {
        let mut ledger = AnswerLedger::new(3);
        let first = Uuid::new_v4();
        ledger.push(record(first, 1));
        ledger.push(record(Uuid::new_v4(), 2));
        ledger.push(record(Uuid::new_v4(), 3));
        assert!(ledger.has_answered(first));

        ledger.push(record(Uuid::new_v4(), 4));
        assert!(!ledger.has_answered(first), "oldest entry should be overwritten");
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn purge_player_removes_all_their_entries() {
        let mut ledger = AnswerLedger::new(10);
        let target = Uuid::new_v4();
        let other = Uuid::new_v4();
        ledger.push(record(target, 100));
        ledger.push(record(other, 200));
        ledger.push(record(target, 300));

        assert_eq!(ledger.purge_player(target), 2);
        assert!(!ledger.has_answered(target));
        assert!(ledger.has_answered(other));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn purge_then_push_keeps_ring_bounded() {
        let mut ledger = AnswerLedger::new(4);
        let target = Uuid::new_v4();
        for _ in 0..4 {
            ledger.push(record(target, 0));
        }
        ledger.purge_player(target);
        assert!(ledger.is_empty());

        for i in 0..10 {
            ledger.push(record(Uuid::new_v4(), i));
        }
        assert_eq!(ledger.len(), 4);
    }

    #[test]
    fn clear_resets_occupancy_but_not_total() {
        let mut ledger = AnswerLedger::new(5);
        ledger.push(record(Uuid::new_v4(), 1));
        ledger.push(record(Uuid::new_v4(), 2));
        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.total_submitted(), 2);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut ledger = AnswerLedger::new(0);
        ledger.push(record(Uuid::new_v4(), 1));
        ledger.push(record(Uuid::new_v4(), 2));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.capacity(), 1);
    }
}
