//! Staggered iperf3 throughput experiments across an emulated network fabric.
//!
//! [`orchestrator::Orchestrator`] is the single entry point used by the HTTP
//! surface in [`http`]; everything that touches a host goes through the
//! [`exec::HostExecutor`] trait.

pub mod config;
pub mod exec;
pub mod health;
pub mod hosts;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod planner;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod traffic;
