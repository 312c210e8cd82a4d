//! Progress Store: durable record of egress servers, per-target click
//! history and per-target goals.
//!
//! All writes are inserts or upserts. Nothing in the rotator deletes rows.

pub mod db;
pub mod models;

pub use db::{ProgressStore, StoreHandle};
pub use models::{ClickAttempt, EgressServer, HealthRecord, Target};
