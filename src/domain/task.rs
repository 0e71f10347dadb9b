//! # Fetch Tasks
//!
//! A task is one unit of fetch work identified by its dimension tuple
//! (date, model, brand and an optional tag). The completion key is the
//! subset of those dimensions used to decide whether a prior run already
//! satisfied the task; it must be recomputable from persisted records.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dates::DATE_FORMAT;
use super::record::Record;

/// Run-local task identifier, used only for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fetch dimensions. The field name is what the dimension is called inside
/// persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Date,
    Model,
    Brand,
    Tag,
}

impl Dimension {
    #[must_use]
    pub const fn field_name(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Model => "model",
            Self::Brand => "brand",
            Self::Tag => "tag",
        }
    }
}

/// Immutable dimension tuple. Equality and hashing cover every dimension,
/// so two tasks are the same task exactly when their tuples match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    pub date: NaiveDate,
    pub model: String,
    pub brand: String,
    pub tag: Option<String>,
}

impl Task {
    pub fn new(
        date: NaiveDate,
        model: impl Into<String>,
        brand: impl Into<String>,
        tag: Option<String>,
    ) -> Self {
        Self {
            date,
            model: model.into(),
            brand: brand.into(),
            tag,
        }
    }

    #[must_use]
    pub fn date_str(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    /// Value of one dimension; a missing tag reads as the empty string so it
    /// lines up with records that carry no `tag` field.
    #[must_use]
    pub fn value(&self, dimension: Dimension) -> String {
        match dimension {
            Dimension::Date => self.date_str(),
            Dimension::Model => self.model.clone(),
            Dimension::Brand => self.brand.clone(),
            Dimension::Tag => self.tag.clone().unwrap_or_default(),
        }
    }

    /// Copies the task dimensions into a record.
    pub fn stamp(&self, record: &mut Record) {
        record.insert(Dimension::Date.field_name(), self.date_str());
        if let Some(tag) = &self.tag {
            record.insert(Dimension::Tag.field_name(), tag.clone());
        }
        record.insert(Dimension::Model.field_name(), self.model.clone());
        record.insert(Dimension::Brand.field_name(), self.brand.clone());
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / ", self.date_str())?;
        if let Some(tag) = &self.tag {
            write!(f, "{tag} / ")?;
        }
        write!(f, "{} / {}", self.brand, self.model)
    }
}

/// Values of the completion dimensions, in `CompletionSpec` order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletionKey(pub Vec<String>);

impl CompletionKey {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }
}

/// Which dimensions decide whether a task was already fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSpec {
    dimensions: Vec<Dimension>,
}

impl CompletionSpec {
    #[must_use]
    pub fn new(dimensions: Vec<Dimension>) -> Self {
        Self { dimensions }
    }

    /// Every dimension: date, tag, model, brand.
    #[must_use]
    pub fn full() -> Self {
        Self::new(vec![
            Dimension::Date,
            Dimension::Tag,
            Dimension::Model,
            Dimension::Brand,
        ])
    }

    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    #[must_use]
    pub fn key_for_task(&self, task: &Task) -> CompletionKey {
        CompletionKey(self.dimensions.iter().map(|d| task.value(*d)).collect())
    }

    /// Recomputes the completion key from a persisted record. Returns `None`
    /// when the record is missing a non-tag dimension.
    #[must_use]
    pub fn key_for_record(&self, record: &Record) -> Option<CompletionKey> {
        let mut values = Vec::with_capacity(self.dimensions.len());
        for dimension in &self.dimensions {
            match record.key_value(dimension.field_name()) {
                Some(value) => values.push(value),
                None if *dimension == Dimension::Tag => values.push(String::new()),
                None => return None,
            }
        }
        Some(CompletionKey(values))
    }

    /// Field names as they appear in records (used for sink reads).
    #[must_use]
    pub fn field_names(&self) -> Vec<&'static str> {
        self.dimensions.iter().map(|d| d.field_name()).collect()
    }
}
