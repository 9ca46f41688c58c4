//! HTTP front: configuration, handlers, middleware, lifecycle.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod module;

pub use config::*;
pub use handlers::{ApiError, AppState};
pub use lifecycle::*;
pub use module::{build_router, NetworkModule};
