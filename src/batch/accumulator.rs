use std::sync::{Mutex, MutexGuard};

use crate::domain::Record;

#[derive(Debug, Default)]
struct Buffer {
    records: Vec<Record>,
    new_rows: usize,
}

/// Append-only record buffer shared by a run. The lock is only held for an
/// in-memory append or copy.
#[derive(Debug, Default)]
pub struct RecordAccumulator {
    buffer: Mutex<Buffer>,
}

impl RecordAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the records of a previous run; they do not count as new.
    #[must_use]
    pub fn with_existing(records: Vec<Record>) -> Self {
        Self {
            buffer: Mutex::new(Buffer {
                records,
                new_rows: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        // A panic while holding the lock cannot leave a half-appended Vec.
        self.buffer.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Appends rows and returns the new total.
    pub fn append(&self, rows: Vec<Record>) -> usize {
        let mut buffer = self.lock();
        buffer.new_rows += rows.len();
        buffer.records.extend(rows);
        buffer.records.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn new_rows(&self) -> usize {
        self.lock().new_rows
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.buffer
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .records
    }
}
