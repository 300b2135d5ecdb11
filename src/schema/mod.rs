//! Input schema for self-paced reading exports
//!
//! Defines the raw row format of the delimited input file and the adapter
//! that turns it into typed rows.

mod adapter;
mod raw_row;

pub use adapter::*;
pub use raw_row::*;
