//! Infrastructure layer: persistence adapters, workflow services, the
//! reconciliation engine and the background workers that drive it.

pub mod audit;
pub mod config;
pub mod connections;
pub mod dispatch;
pub mod domain_event;
pub mod movements;
pub mod notifications;
pub mod payments;
pub mod reconciliation;
pub mod scheduler;
pub mod store;
pub mod subscribers;
pub mod transfers;

#[cfg(test)]
mod integration_tests;
