//! Types shared by the command implementations.

pub mod error;
pub mod report;

pub use error::*;
pub use report::*;
