//! Domain module - fetch work units and the records they produce
//!
//! Each module is its own file in the domain/ directory; the commonly used
//! items are re-exported here.

pub mod concept;
pub mod dates;
pub mod record;
pub mod sink;
pub mod task;

pub use concept::ParsedConcept;
pub use dates::{date_range, parse_date};
pub use record::{CompositeKey, KeySpec, Record};
pub use sink::RecordSink;
pub use task::{CompletionKey, CompletionSpec, Dimension, Task, TaskId};
