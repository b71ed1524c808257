//! Duty pipelines.
//!
//! Every duty is one async pass over the shared clients: fetch a quorum of
//! signed inputs, pick the canonical winner, submit the transaction, wait
//! for inclusion. Duties surface errors only to the scheduler, which logs
//! them and moves on.

pub mod distributor;
pub mod exits;
pub mod force_exit;
pub mod ltv;
pub mod price;
pub mod rewards;
