//! Date buckets for streaming sequence discovery.
//!
//! Records arrive in listing order. Consecutive records with the same date
//! key accumulate in one open bucket; the first record with a different date
//! closes it. A closed bucket is never reopened, so a date that shows up in
//! two separate runs produces two buckets.

use std::collections::HashMap;

/// Sequences seen for one date since the previous flush, with the latest
/// timestamp observed for each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceBucket {
    pub date: String,
    pub sequences: HashMap<String, i64>,
}

impl SequenceBucket {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            sequences: HashMap::new(),
        }
    }

    /// Add a sequence, keeping the latest timestamp seen for it.
    pub fn add(&mut self, sequence: &str, timestamp: i64) {
        self.sequences
            .entry(sequence.to_string())
            .and_modify(|t| *t = (*t).max(timestamp))
            .or_insert(timestamp);
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Sequence ids, newest first; ties by ascending id.
    pub fn sorted_sequences(&self) -> Vec<&str> {
        let mut entries: Vec<(&str, i64)> = self
            .sequences
            .iter()
            .map(|(id, ts)| (id.as_str(), *ts))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries.into_iter().map(|(id, _)| id).collect()
    }
}

/// Crawl-time bucket state. Exactly one bucket is open once the first dated
/// record has been seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BucketState {
    #[default]
    Empty,
    Open(SequenceBucket),
}

impl BucketState {
    /// Feed one dated record. Returns the next state and the bucket that was
    /// closed by this record, if any.
    pub fn observe(
        self,
        date: &str,
        sequence: &str,
        timestamp: i64,
    ) -> (Self, Option<SequenceBucket>) {
        match self {
            BucketState::Open(mut bucket) if bucket.date == date => {
                bucket.add(sequence, timestamp);
                (BucketState::Open(bucket), None)
            }
            previous => {
                let mut bucket = SequenceBucket::new(date);
                bucket.add(sequence, timestamp);
                (BucketState::Open(bucket), previous.finish())
            }
        }
    }

    /// Close the crawl, yielding whatever bucket is still open.
    pub fn finish(self) -> Option<SequenceBucket> {
        match self {
            BucketState::Empty => None,
            BucketState::Open(bucket) => Some(bucket),
        }
    }

    pub fn open_date(&self) -> Option<&str> {
        match self {
            BucketState::Empty => None,
            BucketState::Open(bucket) => Some(&bucket.date),
        }
    }
}

/// Per-sequence discovery tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceStats {
    /// Latest timestamp seen, None while no record of the sequence was dated.
    pub latest: Option<i64>,
    /// Matching images seen for the sequence.
    pub images: u64,
}

impl SequenceStats {
    pub fn observe(&mut self, timestamp: Option<i64>) {
        self.images += 1;
        self.latest = match (self.latest, timestamp) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Sequences ordered by latest timestamp (unknown counts as 0), newest
/// first; ties by ascending id.
pub fn sort_by_latest(
    sequences: &HashMap<String, SequenceStats>,
) -> Vec<(&str, SequenceStats)> {
    let mut entries: Vec<(&str, SequenceStats)> = sequences
        .iter()
        .map(|(id, stats)| (id.as_str(), *stats))
        .collect();
    entries.sort_by(|a, b| {
        b.1.latest
            .unwrap_or(0)
            .cmp(&a.1.latest.unwrap_or(0))
            .then_with(|| a.0.cmp(b.0))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(records: &[(&str, &str, i64)]) -> (Vec<SequenceBucket>, BucketState) {
        let mut state = BucketState::Empty;
        let mut flushed = Vec::new();
        for (date, seq, ts) in records {
            let (next, closed) = state.observe(date, seq, *ts);
            state = next;
            flushed.extend(closed);
        }
        (flushed, state)
    }

    #[test]
    fn test_interleaved_dates_are_not_merged() {
        let (mut flushed, state) = run(&[
            ("20240101", "s1", 1),
            ("20240101", "s2", 2),
            ("20240102", "s3", 3),
            ("20240101", "s4", 4),
        ]);
        flushed.extend(state.finish());

        let dates: Vec<&str> = flushed.iter().map(|b| b.date.as_str()).collect();
        assert_eq!(dates, vec!["20240101", "20240102", "20240101"]);
        assert_eq!(flushed[0].len(), 2);
        assert_eq!(flushed[2].sorted_sequences(), vec!["s4"]);
    }

    #[test]
    fn test_unfinished_crawl_keeps_open_bucket_out() {
        let (flushed, state) = run(&[
            ("20240101", "a", 1),
            ("20240102", "b", 2),
            ("20240103", "c", 3),
        ]);
        // Two boundaries crossed, third bucket still open.
        assert_eq!(flushed.len(), 2);
        assert_eq!(state.open_date(), Some("20240103"));
    }

    #[test]
    fn test_new_bucket_seeded_with_trigger_only() {
        let (flushed, state) = run(&[("20240101", "a", 1), ("20240102", "b", 2)]);
        assert_eq!(flushed[0].sorted_sequences(), vec!["a"]);
        let open = state.finish().unwrap();
        assert_eq!(open.sorted_sequences(), vec!["b"]);
    }

    #[test]
    fn test_latest_timestamp_wins() {
        let mut bucket = SequenceBucket::new("20240101");
        bucket.add("a", 50);
        bucket.add("a", 10);
        bucket.add("b", 30);
        bucket.add("c", 30);
        assert_eq!(bucket.sequences["a"], 50);
        assert_eq!(bucket.sorted_sequences(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_state_finishes_to_nothing() {
        assert!(BucketState::Empty.finish().is_none());
    }

    #[test]
    fn test_sort_by_latest_unknown_is_zero() {
        let stats = |latest| SequenceStats { latest, images: 1 };
        let mut map = HashMap::new();
        map.insert("old".to_string(), stats(Some(5)));
        map.insert("unknown".to_string(), stats(None));
        map.insert("new".to_string(), stats(Some(10)));
        map.insert("neg".to_string(), stats(Some(-1)));
        let ids: Vec<&str> = sort_by_latest(&map).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["new", "old", "unknown", "neg"]);
    }

    #[test]
    fn test_sequence_stats_count_and_latest() {
        let mut stats = SequenceStats::default();
        stats.observe(None);
        stats.observe(Some(7));
        stats.observe(Some(3));
        assert_eq!(
            stats,
            SequenceStats {
                latest: Some(7),
                images: 3
            }
        );
    }
}
