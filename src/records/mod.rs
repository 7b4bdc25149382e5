//! Records Module
//!
//! Durable bookkeeping: which device each chunkserver owns, and the tickets
//! tracking disk swaps.

pub mod disk;
pub mod replacement;

pub use disk::*;
pub use replacement::*;
