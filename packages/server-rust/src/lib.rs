//! `intelgate` server: HTTP gateway, operation registry, and the forwarding
//! bridge to the downstream analysis service.

pub mod bridge;
pub mod config;
pub mod network;
pub mod registry;
pub mod worker;
