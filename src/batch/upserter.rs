//! # Deduplicating Upserter
//!
//! Collapses records sharing a composite key to one survivor, then pushes the
//! survivors to a sink in fixed-size batches. Failed batches are logged with
//! their index and error body and the remaining batches still run.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tracing::{error, info};

use crate::domain::{CompositeKey, KeySpec, Record, RecordSink};
use crate::errors::{EtlError, snippet};

/// Which record survives when two share a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TieBreak {
    KeepFirst,
    /// Later records replace the survivor only with a strictly greater value.
    KeepMax(String),
}

impl Default for TieBreak {
    fn default() -> Self {
        Self::KeepMax("mentions".to_string())
    }
}

impl TieBreak {
    fn replaces(&self, candidate: &Record, current: &Record) -> bool {
        match self {
            Self::KeepFirst => false,
            Self::KeepMax(field) => match (candidate.number(field), current.number(field)) {
                (Some(c), Some(cur)) => c > cur,
                (Some(_), None) => true,
                _ => false,
            },
        }
    }
}

impl FromStr for TieBreak {
    type Err = EtlError;

    /// `first` or `max:<field>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("first") {
            return Ok(Self::KeepFirst);
        }
        match s.split_once(':') {
            Some((rule, field)) if rule.eq_ignore_ascii_case("max") && !field.trim().is_empty() => {
                Ok(Self::KeepMax(field.trim().to_string()))
            }
            _ => Err(EtlError::Config(format!(
                "Invalid tie-break '{s}' (expected 'first' or 'max:<field>')"
            ))),
        }
    }
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepFirst => write!(f, "first"),
            Self::KeepMax(field) => write!(f, "max:{field}"),
        }
    }
}

/// Survivors in first-seen key order.
#[must_use]
pub fn dedup(records: Vec<Record>, key: &KeySpec, rule: &TieBreak) -> Vec<Record> {
    let mut index: HashMap<CompositeKey, usize> = HashMap::with_capacity(records.len());
    let mut survivors: Vec<Record> = Vec::new();

    for record in records {
        let k = key.key(&record);
        match index.get(&k) {
            Some(&i) => {
                if rule.replaces(&record, &survivors[i]) {
                    survivors[i] = record;
                }
            }
            None => {
                index.insert(k, survivors.len());
                survivors.push(record);
            }
        }
    }
    survivors
}

#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub index: usize,
    pub rows: usize,
    pub error: EtlError,
}

#[derive(Debug, Clone, Default)]
pub struct UpsertSummary {
    pub input: usize,
    pub unique: usize,
    pub batches: usize,
    pub upserted: usize,
    pub failed: Vec<BatchFailure>,
}

impl UpsertSummary {
    #[must_use]
    pub fn failed_rows(&self) -> usize {
        self.failed.iter().map(|f| f.rows).sum()
    }
}

impl fmt::Display for UpsertSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Records in:        {}", self.input)?;
        writeln!(f, "Unique records:    {}", self.unique)?;
        writeln!(f, "Batches:           {}", self.batches)?;
        writeln!(f, "Rows upserted:     {}", self.upserted)?;
        if !self.failed.is_empty() {
            let indices: Vec<String> = self.failed.iter().map(|b| b.index.to_string()).collect();
            writeln!(
                f,
                "Failed batches:    {} ({} rows; indices {})",
                self.failed.len(),
                self.failed_rows(),
                indices.join(", ")
            )?;
        }
        Ok(())
    }
}

pub struct Upserter {
    key: KeySpec,
    rule: TieBreak,
    batch_size: usize,
}

impl Upserter {
    pub fn new(key: KeySpec, rule: TieBreak, batch_size: usize) -> Self {
        Self {
            key,
            rule,
            batch_size: batch_size.max(1),
        }
    }

    #[must_use]
    pub fn key(&self) -> &KeySpec {
        &self.key
    }

    #[must_use]
    pub fn dedup(&self, records: Vec<Record>) -> Vec<Record> {
        dedup(records, &self.key, &self.rule)
    }

    pub async fn upsert(&self, records: Vec<Record>, sink: &dyn RecordSink) -> UpsertSummary {
        let input = records.len();
        let unique = self.dedup(records);
        info!(
            "Deduplicated {} records to {} on ({}) keeping {}",
            input,
            unique.len(),
            self.key.on_conflict(),
            self.rule
        );

        let mut summary = UpsertSummary {
            input,
            unique: unique.len(),
            ..UpsertSummary::default()
        };

        let total_batches = unique.len().div_ceil(self.batch_size);
        for (index, batch) in unique.chunks(self.batch_size).enumerate() {
            summary.batches += 1;
            match sink.upsert(&self.key, batch).await {
                Ok(()) => {
                    summary.upserted += batch.len();
                    info!(
                        "Batch {}/{}: {} rows upserted",
                        index + 1,
                        total_batches,
                        batch.len()
                    );
                }
                Err(e) => {
                    let sample = batch
                        .first()
                        .and_then(|r| serde_json::to_string(r).ok())
                        .map(|s| snippet(&s))
                        .unwrap_or_default();
                    error!(
                        "Batch {}/{} failed ({} rows): {} | first row: {}",
                        index + 1,
                        total_batches,
                        batch.len(),
                        e,
                        sample
                    );
                    summary.failed.push(BatchFailure {
                        index,
                        rows: batch.len(),
                        error: e,
                    });
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_sink::MemorySink;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Mutex;

    fn key() -> KeySpec {
        KeySpec::parse("date,concept,model,brand")
    }

    fn mention(concept: &str, mentions: i64) -> Record {
        Record::from_value(json!({
            "date": "2026-01-01", "concept": concept, "model": "m1", "brand": "Samsung",
            "mentions": mentions
        }))
        .unwrap()
    }

    #[test]
    fn keep_max_picks_nine_over_five() {
        let out = dedup(vec![mention("AI", 5), mention("AI", 9)], &key(), &TieBreak::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].number("mentions"), Some(9.0));

        let out = dedup(vec![mention("AI", 9), mention("AI", 5)], &key(), &TieBreak::default());
        assert_eq!(out[0].number("mentions"), Some(9.0));
    }

    #[test]
    fn keep_first_ignores_values() {
        let out = dedup(vec![mention("AI", 5), mention("AI", 9)], &key(), &TieBreak::KeepFirst);
        assert_eq!(out[0].number("mentions"), Some(5.0));
    }

    #[test]
    fn ties_keep_first_seen() {
        let mut a = mention("AI", 4);
        a.insert("source", "a");
        let mut b = mention("AI", 4);
        b.insert("source", "b");
        let out = dedup(vec![a, b], &key(), &TieBreak::default());
        assert_eq!(out[0].key_value("source").as_deref(), Some("a"));
    }

    #[rstest]
    #[case("first", Some(TieBreak::KeepFirst))]
    #[case("max:mentions", Some(TieBreak::KeepMax("mentions".into())))]
    #[case(" MAX:volume ", Some(TieBreak::KeepMax("volume".into())))]
    #[case("max:", None)]
    #[case("last", None)]
    fn tie_break_parsing(#[case] raw: &str, #[case] expected: Option<TieBreak>) {
        assert_eq!(raw.parse::<TieBreak>().ok(), expected);
    }

    proptest! {
        #[test]
        fn keep_max_is_order_independent(
            values in proptest::collection::vec((0usize..4, 0i64..1000), 1..40)
        ) {
            let records: Vec<Record> = values
                .iter()
                .map(|(k, m)| mention(&format!("c{k}"), *m))
                .collect();
            let mut reversed = records.clone();
            reversed.reverse();

            let rule = TieBreak::default();
            let forward = dedup(records, &key(), &rule);
            let backward = dedup(reversed, &key(), &rule);
            prop_assert_eq!(forward.len(), backward.len());

            for survivor in &forward {
                let concept = survivor.key_value("concept").unwrap();
                let max = values
                    .iter()
                    .filter(|(k, _)| format!("c{k}") == concept)
                    .map(|(_, m)| *m)
                    .max()
                    .unwrap();
                prop_assert_eq!(survivor.number("mentions"), Some(max as f64));
                let other = backward
                    .iter()
                    .find(|r| r.key_value("concept").as_deref() == Some(concept.as_str()))
                    .unwrap();
                prop_assert_eq!(other.number("mentions"), Some(max as f64));
            }
        }
    }

    /// Fails every batch whose index is listed.
    struct FlakySink {
        fail: Vec<usize>,
        seen: Mutex<usize>,
        inner: MemorySink,
    }

    #[async_trait]
    impl RecordSink for FlakySink {
        async fn upsert(&self, key: &KeySpec, batch: &[Record]) -> Result<(), EtlError> {
            let index = {
                let mut seen = self.seen.lock().unwrap();
                *seen += 1;
                *seen - 1
            };
            if self.fail.contains(&index) {
                return Err(EtlError::from_status(400, "{\"message\":\"bad column\"}"));
            }
            self.inner.upsert(key, batch).await
        }
    }

    #[tokio::test]
    async fn failed_batch_does_not_abort_the_rest() {
        let records: Vec<Record> = (0..12).map(|i| mention(&format!("c{i}"), i)).collect();
        let sink = FlakySink {
            fail: vec![1],
            seen: Mutex::new(0),
            inner: MemorySink::new(),
        };
        let summary = Upserter::new(key(), TieBreak::default(), 5)
            .upsert(records, &sink)
            .await;

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.upserted, 7);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].index, 1);
        assert_eq!(summary.failed[0].error.status(), Some(400));
        assert_eq!(sink.inner.len(), 7);
    }

    #[tokio::test]
    async fn upserting_twice_is_idempotent() {
        let records = vec![mention("AI", 5), mention("AI", 9), mention("HDR", 1)];
        let upserter = Upserter::new(key(), TieBreak::default(), 500);

        let once = MemorySink::new();
        upserter.upsert(records.clone(), &once).await;

        let twice = MemorySink::new();
        upserter.upsert(records.clone(), &twice).await;
        upserter.upsert(records, &twice).await;

        assert_eq!(once.snapshot(), twice.snapshot());
        assert_eq!(twice.len(), 2);
    }
}
