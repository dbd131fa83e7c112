//! Policy enforcement and usage accounting (C9 + C10, spec.md §4.8-4.9).
//!
//! Callers wire [`middleware::enforce_policy`] onto their router with
//! `axum::middleware::from_fn_with_state(Arc::new(policy_state), dk_policy::middleware::enforce_policy)`.

pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod state;
pub mod usage;

pub use error::{ApiError, ErrorKind};
pub use state::PolicyState;
