//! Command-line arguments shared by the binaries.

pub mod master;
pub mod worker;
