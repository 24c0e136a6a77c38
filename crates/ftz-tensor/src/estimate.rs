//! Arithmetic-operation counts, used to express flush totals as a share of
//! the work a layer performed.

use crate::conv::Conv2dGeometry;

/// Multiplies plus adds of an `[m, k] x [k, n]` product.
pub fn matmul_ops(m: usize, k: usize, n: usize) -> u64 {
    2 * m as u64 * k as u64 * n as u64
}

/// Accumulations performed by the kn2row shift-add pass.
pub fn shift_add_ops(geom: &Conv2dGeometry) -> u64 {
    let plane = geom.sample_len();
    let mut per_sample = 0u64;
    for ky in 0..geom.k_h {
        for kx in 0..geom.k_w {
            per_sample += plane.saturating_sub(geom.tap_offset(ky, kx).unsigned_abs()) as u64;
        }
    }
    geom.batch as u64 * geom.out_c as u64 * per_sample
}

/// Operations of one kn2row convolution followed by a bias add.
pub fn conv2d_ops(geom: &Conv2dGeometry) -> u64 {
    let product = matmul_ops(
        geom.taps() * geom.out_c,
        geom.in_c,
        geom.batch * geom.sample_len(),
    );
    let bias = geom.batch as u64 * geom.out_h() as u64 * geom.out_w() as u64 * geom.out_c as u64;
    product + shift_add_ops(geom) + bias
}

/// Operations of a dense layer: product plus bias add.
pub fn dense_ops(batch: usize, in_features: usize, out_features: usize) -> u64 {
    matmul_ops(batch, in_features, out_features) + batch as u64 * out_features as u64
}

/// `flushes` as a percentage of `ops`; 0 when no operations were performed.
pub fn flush_percentage(flushes: u64, ops: u64) -> f64 {
    if ops == 0 {
        return 0.0;
    }
    100.0 * flushes as f64 / ops as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::Padding;
    use crate::shape::Shape;

    #[test]
    fn test_matmul_and_dense() {
        assert_eq!(matmul_ops(2, 3, 4), 48);
        assert_eq!(dense_ops(2, 3, 4), 48 + 8);
        assert_eq!(matmul_ops(0, 3, 4), 0);
    }

    #[test]
    fn test_shift_add_box() {
        // 1x3x3x1 same with 3x3 kernel: plane 5x5 = 25, offsets -6..=6
        let g = Conv2dGeometry::new(
            &Shape::new(vec![1, 3, 3, 1]),
            &Shape::new(vec![3, 3, 1, 1]),
            Padding::Same,
            (1, 1),
        )
        .unwrap();
        // |o| over taps: 6,5,4,1,0,1,4,5,6 -> sum 32
        assert_eq!(shift_add_ops(&g), 9 * 25 - 32);
        assert_eq!(conv2d_ops(&g), 2 * 9 * 25 + (9 * 25 - 32) + 9);
    }

    #[test]
    fn test_flush_percentage() {
        assert_eq!(flush_percentage(5, 0), 0.0);
        assert!((flush_percentage(1, 4) - 25.0).abs() < 1e-12);
    }
}
