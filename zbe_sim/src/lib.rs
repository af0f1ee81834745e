//! ZBE Navigator deterministic drive simulation.
//!
//! Runs the proximity engine against scripted drives with every source of
//! non-determinism pinned down:
//! - **Time**: a virtual clock that moves one GPS tick at a time
//! - **GPS**: fixes generated by a seeded oracle (noise and dropouts)
//! - **Storage**: an in-memory snapshot store shared across restarts
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   ScenarioRunner                     │
//! │  ┌─────────────┐  fix   ┌──────────────────────┐     │
//! │  │ RouteOracle │───────►│  ProximityMonitor     │     │
//! │  │ (truth+GPS) │        │  <SimContext>         │     │
//! │  └─────────────┘        └──────────┬───────────┘     │
//! │         ▲                          │ alerts          │
//! │         │ step(dt)                 ▼                 │
//! │  ┌──────┴──────┐        ┌──────────────────────┐     │
//! │  │ SimContext  │        │ audit + SimExport    │     │
//! │  │ (clock)     │        └──────────────────────┘     │
//! │  └─────────────┘                                     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use zbe_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_duration(120.0).run(ScenarioId::Loiter);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{FrameAlert, SimExport, SimFrame};
pub use oracle::RouteOracle;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
