//! Vendor API adapters implementing the batch `PageSource` contract.

pub mod semrush;

pub use semrush::SemrushConcepts;
