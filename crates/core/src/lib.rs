//! Domain types shared by the job monitor and its consumers.
//!
//! Everything here is pure data plus small helpers; no I/O happens in
//! this crate.

pub mod capability;
pub mod entity;
pub mod error;
pub mod job;
pub mod target;
pub mod topics;
pub mod types;
