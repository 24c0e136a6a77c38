//! Elementwise flushing kernels.

use rayon::prelude::*;

use crate::counter::FlushCounter;
use crate::error::{Result, TensorError};
use crate::ftz::{flush_slice, flush_to_zero};

/// Flush `data` in place, `chunk` elements per parallel task.
pub fn flush_parallel(
    data: &mut [f32],
    threshold: u32,
    chunk: usize,
    counter: &FlushCounter,
) -> Result<()> {
    if threshold == 0 || data.is_empty() {
        return Ok(());
    }
    data.par_chunks_mut(chunk.max(1))
        .try_for_each(|part| counter.record_current(flush_slice(part, threshold)))
}

/// `data[r, c] = flush(data[r, c] + flush(bias[c]))` over rows of
/// `bias.len()` elements. The bias itself is flushed (and counted) once.
pub fn add_bias_parallel(
    data: &mut [f32],
    bias: &[f32],
    threshold: u32,
    chunk: usize,
    counter: &FlushCounter,
) -> Result<()> {
    if bias.is_empty() || data.len() % bias.len() != 0 {
        return Err(TensorError::Other(format!(
            "add_bias: data.len()={} is not a multiple of bias.len()={}",
            data.len(),
            bias.len()
        )));
    }

    let mut bias = bias.to_vec();
    counter.record_current(flush_slice(&mut bias, threshold))?;

    let width = bias.len();
    let rows_per_task = (chunk / width).max(1);
    data.par_chunks_mut(rows_per_task * width)
        .try_for_each(|part| {
            let mut flushed = 0u64;
            for row in part.chunks_exact_mut(width) {
                for (v, &b) in row.iter_mut().zip(&bias) {
                    *v = flush_to_zero(*v + b, threshold, &mut flushed);
                }
            }
            counter.record_current(flushed)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DENORMAL: f32 = 1.0e-40;

    fn counter() -> FlushCounter {
        FlushCounter::new(rayon::current_num_threads())
    }

    #[test]
    fn test_flush_parallel_counts_every_chunk() {
        let counter = counter();
        let mut data: Vec<f32> = (0..1000)
            .map(|i| if i % 10 == 0 { DENORMAL } else { i as f32 })
            .collect();
        flush_parallel(&mut data, 1, 7, &counter).unwrap();
        assert_eq!(counter.total(), 100);
        assert!(data.iter().step_by(10).all(|&v| v.to_bits() == 0));
        assert_eq!(data[1], 1.0);
    }

    #[test]
    fn test_flush_parallel_disabled() {
        let counter = counter();
        let mut data = vec![DENORMAL; 16];
        flush_parallel(&mut data, 0, 4, &counter).unwrap();
        assert_eq!(data, vec![DENORMAL; 16]);
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn test_add_bias() {
        let counter = counter();
        let mut data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        add_bias_parallel(&mut data, &[10.0, 20.0, 30.0], 0, 1, &counter).unwrap();
        assert_eq!(data, vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn test_add_bias_flushes_bias_and_sum() {
        let counter = counter();
        // both bias entries flush once; the denormal in each row flushes on the add
        let mut data = vec![DENORMAL, 5.0, DENORMAL, 5.0];
        add_bias_parallel(&mut data, &[DENORMAL, DENORMAL], 1, 2, &counter).unwrap();
        assert_eq!(data, vec![0.0, 5.0, 0.0, 5.0]);
        assert_eq!(counter.total(), 2 + 2);
    }

    #[test]
    fn test_add_bias_width_mismatch() {
        let counter = counter();
        let mut data = vec![0.0; 5];
        assert!(add_bias_parallel(&mut data, &[1.0, 2.0], 0, 4, &counter).is_err());
        assert!(add_bias_parallel(&mut data, &[], 0, 4, &counter).is_err());
    }
}
