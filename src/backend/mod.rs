//! Evaluation drivers.
//!
//! This module defines the [`Backend`] trait and its implementation:
//! - [`Cpu`]: tiled CPU driver, parallel across output rows with the `parallel` feature

mod cpu;
mod traits;

pub use cpu::Cpu;
pub use traits::{Backend, BackendScalar};
