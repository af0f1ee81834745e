//! ZBE Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the ZBE proximity
//! engine to run both against the **real clock** (tokio) and against a
//! **virtual clock** (route replay, tests).
//!
//! # Core Concept
//!
//! Every time-dependent decision in the engine (cache TTLs, alert cooldowns,
//! sweep scheduling) reads time through [`ZbeContext`]:
//! - Time (`now()`, `system_time()`, `now_ms()`)
//! - Scheduling (`sleep()`, `spawn()`)
//!
//! Swapping [`TokioContext`] for [`ManualContext`] makes a whole drive
//! reproducible: advancing the virtual clock by 31 seconds is enough to
//! observe a cooldown expiring.
//!
//! # Example
//!
//! ```ignore
//! use zbe_env::{ZbeContext, ManualContext};
//! use std::time::Duration;
//!
//! let ctx = ManualContext::new();
//! let t0 = ctx.now_ms();
//! ctx.advance_time(Duration::from_millis(1001));
//! assert_eq!(ctx.now_ms() - t0, 1001);
//! ```

mod context;
mod types;
mod error;
mod tokio_impl;
mod manual_impl;

pub use context::ZbeContext;
pub use types::{Position, SessionId};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use manual_impl::ManualContext;
