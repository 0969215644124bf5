pub mod action;
pub mod args;
pub mod client;
pub mod config;
pub mod controller;
pub mod decision;
pub mod driver;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod queue;
pub mod recorder;
pub mod watch;

#[cfg(test)]
mod testkit;
