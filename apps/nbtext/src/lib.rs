//! # nbtext
//!
//! The command line front end of `nbtext-core`. The `cli` module is exposed
//! as a library so that integration tests can drive the commands without
//! spawning the binary.

pub mod cli;
