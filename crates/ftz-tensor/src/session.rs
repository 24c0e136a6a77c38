//! The four-call entry surface used by model code: flush an array, multiply,
//! convolve, and read the flush count.

use tracing::debug;

use crate::backend::ComputeBackend;
use crate::config::KernelConfig;
use crate::conv::Padding;
use crate::counter::FlushCounter;
use crate::cpu::CpuBackend;
use crate::error::{Result, TensorError};
use crate::tensor::Tensor;

/// A backend paired with the flush counter its workers report into.
#[derive(Debug)]
pub struct Session {
    backend: Box<dyn ComputeBackend>,
    counter: FlushCounter,
}

impl Session {
    /// Session over a [`CpuBackend`] built from `config`, with one counter
    /// slot per worker.
    pub fn new(config: KernelConfig) -> Result<Self> {
        let backend = CpuBackend::new(config)?;
        Self::with_backend(Box::new(backend))
    }

    /// Session over a [`CpuBackend`] configured from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(KernelConfig::from_env()?)
    }

    /// Session over any backend, with one counter slot per worker.
    pub fn with_backend(backend: Box<dyn ComputeBackend>) -> Result<Self> {
        let slots = backend.num_workers();
        Self::with_counter_capacity(backend, slots)
    }

    /// Session whose counter has exactly `slots` slots. Fails if the
    /// backend has more workers than that.
    pub fn with_counter_capacity(backend: Box<dyn ComputeBackend>, slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(TensorError::Config("counter needs at least one slot".to_string()));
        }
        let counter = FlushCounter::new(slots);
        counter.check_workers(backend.num_workers())?;
        debug!(backend = backend.name(), slots, "session created");
        Ok(Session { backend, counter })
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    pub fn counter(&self) -> &FlushCounter {
        &self.counter
    }

    /// Flush every element of `array` below `threshold`.
    pub fn flush_array(&self, array: Tensor, threshold: u32) -> Result<Tensor> {
        array.flush(threshold, self.backend.as_ref(), &self.counter)
    }

    /// `a @ b` with flushing after every multiply and add.
    pub fn matmul(&self, a: &Tensor, b: &Tensor, threshold: u32) -> Result<Tensor> {
        a.matmul(b, threshold, self.backend.as_ref(), &self.counter)
    }

    /// 2-D convolution of an NHWC `input` with a `[KH, KW, Cin, Cout]`
    /// `kernel`.
    pub fn convolve(
        &self,
        input: &Tensor,
        kernel: &Tensor,
        padding: Padding,
        strides: (usize, usize),
        threshold: u32,
    ) -> Result<Tensor> {
        input.conv2d(
            kernel,
            padding,
            strides,
            threshold,
            self.backend.as_ref(),
            &self.counter,
        )
    }

    /// Flushed bias add along the innermost axis.
    pub fn add_bias(&self, data: Tensor, bias: &Tensor, threshold: u32) -> Result<Tensor> {
        data.add_bias(bias, threshold, self.backend.as_ref(), &self.counter)
    }

    /// Total flush events since creation or the last reset.
    pub fn get_flush_count(&mut self, reset: bool) -> u64 {
        self.counter.get_flush_count(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::ReferenceBackend;
    use crate::shape::Shape;

    fn session(workers: usize) -> Session {
        Session::new(KernelConfig::default().with_workers(workers)).unwrap()
    }

    #[test]
    fn test_counter_sized_to_workers() {
        let s = session(3);
        assert_eq!(s.counter().capacity(), 3);
        assert_eq!(s.backend().name(), "cpu");
    }

    #[test]
    fn test_counter_too_small() {
        let backend = CpuBackend::with_workers(4).unwrap();
        assert!(matches!(
            Session::with_counter_capacity(Box::new(backend), 2),
            Err(TensorError::WorkerCapacity { workers: 4, slots: 2 })
        ));
        let backend = CpuBackend::with_workers(2).unwrap();
        assert!(Session::with_counter_capacity(Box::new(backend), 8).is_ok());
    }

    #[test]
    fn test_flush_then_count() {
        let mut s = session(2);
        let x = Tensor::new(vec![1.0e-40, 1.0, 2.0e-39, 0.0], Shape::new(vec![4]));
        let y = s.flush_array(x, 1).unwrap();
        assert_eq!(y.data(), &[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(s.get_flush_count(true), 2);
        assert_eq!(s.get_flush_count(false), 0);
    }

    #[test]
    fn test_matmul_counts_flushed_products() {
        let mut s = session(2);
        let a = Tensor::new(vec![1.0e-20, 1.0], Shape::new(vec![1, 2]));
        let b = Tensor::new(vec![1.0e-20, 3.0], Shape::new(vec![2, 1]));
        let c = s.matmul(&a, &b, 1).unwrap();
        assert_eq!(c.data(), &[3.0]);
        assert_eq!(s.get_flush_count(true), 1);
    }

    #[test]
    fn test_convolve_and_bias() {
        let mut s = Session::with_backend(Box::new(ReferenceBackend::new())).unwrap();
        let x = Tensor::new(vec![1.0; 9], Shape::new(vec![1, 3, 3, 1]));
        let k = Tensor::new(vec![1.0; 9], Shape::new(vec![3, 3, 1, 1]));
        let y = s.convolve(&x, &k, Padding::Same, (1, 1), 1).unwrap();
        assert_eq!(y.data(), &[4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
        let bias = Tensor::new(vec![1.0], Shape::new(vec![1]));
        let y = s.add_bias(y, &bias, 1).unwrap();
        assert_eq!(y.data()[4], 10.0);
        assert_eq!(s.get_flush_count(false), 0);
    }
}
