//! `ftz-tensor` - Flush-to-zero emulation for f32 tensor kernels.
//!
//! This crate provides:
//! - The FTZ primitive: an exponent-threshold test that replaces small
//!   values with `+0.0` and counts each replacement
//! - A per-worker `FlushCounter` aggregated by explicit reduction
//! - A `ComputeBackend` trait with a parallel `CpuBackend` (tiled matmul,
//!   kn2row convolution) and a single-threaded `ReferenceBackend`
//! - A `Tensor` type, convolution geometry, and a `Session` facade
//! - Operation-count estimates for relating flush totals to work done

pub mod backend;
pub mod config;
pub mod conv;
pub mod counter;
pub mod cpu;
pub mod error;
pub mod estimate;
pub mod ftz;
pub mod session;
pub mod shape;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use config::KernelConfig;
pub use conv::{Conv2dGeometry, Padding};
pub use counter::FlushCounter;
pub use cpu::{CpuBackend, ReferenceBackend};
pub use error::{Result, TensorError};
pub use ftz::flush_to_zero;
pub use session::Session;
pub use shape::Shape;
pub use tensor::Tensor;
