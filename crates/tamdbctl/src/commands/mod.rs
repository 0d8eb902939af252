//! Command implementations for tamdbctl.

pub mod query;
