//! A GPU particle sandbox: a material point simulation whose particles are
//! emitted, bucketed and transferred entirely in compute kernels, with the
//! host only sequencing dispatches and reading counters back asynchronously.

pub mod app;
pub mod config;
pub mod error;
pub mod gpu;
pub mod layout;
mod rendering;
pub mod simulation;
pub mod time;
