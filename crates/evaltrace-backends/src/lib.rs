//! History backends for evaluation traces.
//!
//! This crate provides the storage implementations of
//! [`evaltrace_core::History`]:
//!
//! - [`CountHistory`]: evaluation counters only, no trace
//! - [`MemoryHistory`]: full trace kept in memory
//! - [`CsvHistory`]: trace written to a CSV file
//! - [`HierarchicalHistory`]: trace written to one group of a shared
//!   hierarchical store
//!
//! [`text_codec`] holds the array text format used inside CSV cells.

pub mod counter;
pub mod flat_file;
pub mod hierarchical;
pub mod memory;
pub mod text_codec;

pub use counter::CountHistory;
pub use flat_file::CsvHistory;
pub use hierarchical::HierarchicalHistory;
pub use memory::MemoryHistory;
