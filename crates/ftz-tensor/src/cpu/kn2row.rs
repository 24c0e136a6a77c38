//! kn2row convolution.
//!
//! Instead of building a patch matrix, the padded input is viewed as a
//! `[Cin, N*Hp*Wp]` matrix and multiplied once by the kernel viewed as
//! `[KH*KW*Cout, Cin]`. Row block `(ky, kx)` of the product is that tap's
//! unshifted contribution at every pixel; sliding it by the tap's flat offset
//! and accumulating gives the convolution over the padded plane, which is
//! then cropped and strided.

use rayon::prelude::*;

use crate::conv::Conv2dGeometry;
use crate::counter::FlushCounter;
use crate::error::Result;
use crate::ftz::flush_to_zero;

use super::matmul::{tiled_matmul, transpose};

/// Convolve NHWC `input` with `[KH, KW, Cin, Cout]` `kernel`.
pub fn kn2row(
    input: &[f32],
    kernel: &[f32],
    geom: &Conv2dGeometry,
    block: usize,
    threshold: u32,
    counter: &FlushCounter,
) -> Result<Vec<f32>> {
    let padded = geom.pad_input(input);
    let pixels = geom.batch * geom.sample_len();

    // [N*Hp*Wp, Cin] -> [Cin, N*Hp*Wp]
    let in_mat = transpose(&padded, pixels, geom.in_c);
    let kern_mat = kernel_matrix(kernel, geom);
    let prod = tiled_matmul(
        &kern_mat,
        &in_mat,
        geom.taps() * geom.out_c,
        geom.in_c,
        pixels,
        block,
        threshold,
        counter,
    )?;

    let planes = shift_add(&prod, geom, threshold, counter)?;
    Ok(crop(&planes, geom))
}

/// Rearrange `[KH, KW, Cin, Cout]` into `[KH*KW*Cout, Cin]`, row
/// `(ky*KW + kx)*Cout + co`.
pub(crate) fn kernel_matrix(kernel: &[f32], geom: &Conv2dGeometry) -> Vec<f32> {
    let (cin, cout) = (geom.in_c, geom.out_c);
    let mut out = vec![0.0f32; kernel.len()];
    for tap in 0..geom.taps() {
        let src = &kernel[tap * cin * cout..(tap + 1) * cin * cout];
        let dst = &mut out[tap * cout * cin..(tap + 1) * cout * cin];
        for ci in 0..cin {
            for co in 0..cout {
                dst[co * cin + ci] = src[ci * cout + co];
            }
        }
    }
    out
}

/// Accumulate every tap's product rows into per-sample `[Cout, Hp*Wp]`
/// planes, shifted by the tap offset and clipped to the sample.
///
/// Returns `[N, Cout, Hp, Wp]`. Samples run in parallel.
fn shift_add(
    prod: &[f32],
    geom: &Conv2dGeometry,
    threshold: u32,
    counter: &FlushCounter,
) -> Result<Vec<f32>> {
    let plane = geom.sample_len();
    let cout = geom.out_c;
    let row_len = geom.batch * plane;
    let mut planes = vec![0.0f32; geom.batch * cout * plane];
    if planes.is_empty() {
        return Ok(planes);
    }

    planes
        .par_chunks_mut(cout * plane)
        .enumerate()
        .try_for_each(|(sample, acc)| {
            let sample_off = sample * plane;
            let mut flushed = 0u64;
            for ky in 0..geom.k_h {
                for kx in 0..geom.k_w {
                    let offset = geom.tap_offset(ky, kx);
                    let span = plane.saturating_sub(offset.unsigned_abs());
                    if span == 0 {
                        continue;
                    }
                    // acc[p] += prod[p + offset] for every p keeping both in-sample
                    let (acc_start, prod_start) = if offset < 0 {
                        (offset.unsigned_abs(), 0)
                    } else {
                        (0, offset as usize)
                    };
                    let tap_row = (ky * geom.k_w + kx) * cout;
                    for co in 0..cout {
                        let src_off = (tap_row + co) * row_len + sample_off + prod_start;
                        let src = &prod[src_off..src_off + span];
                        let dst = &mut acc[co * plane + acc_start..co * plane + acc_start + span];
                        for (d, &p) in dst.iter_mut().zip(src) {
                            *d = flush_to_zero(*d + p, threshold, &mut flushed);
                        }
                    }
                }
            }
            counter.record_current(flushed)
        })?;

    Ok(planes)
}

/// Crop `[N, Cout, Hp, Wp]` planes to the strided output window, as NHWC.
fn crop(planes: &[f32], geom: &Conv2dGeometry) -> Vec<f32> {
    let (hp, wp, cout) = (geom.padded_h(), geom.padded_w(), geom.out_c);
    let (oh, ow) = (geom.out_h(), geom.out_w());
    let (y0, x0) = (geom.crop_start_h(), geom.crop_start_w());
    let mut out = Vec::with_capacity(geom.batch * oh * ow * cout);
    for s in 0..geom.batch {
        for oy in 0..oh {
            let y = y0 + oy * geom.stride_h;
            for ox in 0..ow {
                let x = x0 + ox * geom.stride_w;
                for co in 0..cout {
                    out.push(planes[((s * cout + co) * hp + y) * wp + x]);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::Padding;
    use crate::shape::Shape;

    fn counter() -> FlushCounter {
        FlushCounter::new(rayon::current_num_threads())
    }

    fn geom(input: &[usize], kernel: &[usize], padding: Padding, strides: (usize, usize)) -> Conv2dGeometry {
        Conv2dGeometry::new(&Shape::from_slice(input), &Shape::from_slice(kernel), padding, strides)
            .unwrap()
    }

    #[test]
    fn test_kernel_matrix_layout() {
        // KH=1, KW=2, Cin=2, Cout=3; value encodes (kx, ci, co)
        let g = geom(&[1, 1, 2, 2], &[1, 2, 2, 3], Padding::Valid, (1, 1));
        let kernel: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let m = kernel_matrix(&kernel, &g);
        // row (kx=0, co=1): [k[0,0,0,1], k[0,0,1,1]] = [1, 4]
        assert_eq!(&m[2..4], &[1.0, 4.0]);
        // row (kx=1, co=2): [k[0,1,0,2], k[0,1,1,2]] = [8, 11]
        assert_eq!(&m[10..12], &[8.0, 11.0]);
    }

    #[test]
    fn test_identity_kernel() {
        // 3x3 kernel with a single 1 at the centre reproduces the input
        let g = geom(&[1, 3, 4, 1], &[3, 3, 1, 1], Padding::Same, (1, 1));
        let input: Vec<f32> = (1..=12).map(|i| i as f32).collect();
        let mut kernel = vec![0.0f32; 9];
        kernel[4] = 1.0;
        let out = kn2row(&input, &kernel, &g, 64, 0, &counter()).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_box_filter_same() {
        // all-ones 3x3 over all-ones 3x3 image: corner 4, edge 6, centre 9
        let g = geom(&[1, 3, 3, 1], &[3, 3, 1, 1], Padding::Same, (1, 1));
        let out = kn2row(&[1.0; 9], &[1.0; 9], &g, 64, 0, &counter()).unwrap();
        assert_eq!(out, vec![4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_taps_do_not_leak_across_samples() {
        // second sample is zero; any leakage would show up in its output
        let g = geom(&[2, 2, 2, 1], &[3, 3, 1, 1], Padding::Valid, (1, 1));
        let g_same = Conv2dGeometry { padding: Padding::Same, ..g };
        let mut input = vec![0.0f32; 8];
        input[..4].copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let out = kn2row(&input, &[1.0; 9], &g_same, 64, 0, &counter()).unwrap();
        assert_eq!(&out[..4], &[10.0; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
    }

    #[test]
    fn test_stride_two_anchors_one_past_border() {
        // 1x1 kernel: output is the strided input starting at row/col 1
        let g = geom(&[1, 4, 4, 1], &[1, 1, 1, 1], Padding::Same, (2, 2));
        let input: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let out = kn2row(&input, &[1.0], &g, 64, 0, &counter()).unwrap();
        assert_eq!(out, vec![5.0, 7.0, 13.0, 15.0]);
    }

    #[test]
    fn test_multi_channel_sum() {
        // 1x1 kernel summing two channels into one
        let g = geom(&[1, 1, 2, 2], &[1, 1, 2, 1], Padding::Valid, (1, 1));
        let out = kn2row(&[1.0, 2.0, 3.0, 4.0], &[10.0, 1.0], &g, 1, 0, &counter()).unwrap();
        assert_eq!(out, vec![12.0, 34.0]);
    }

    #[test]
    fn test_width_two_kernel_stays_in_row() {
        // no padding on the width axis: the last column would pull its second
        // tap from the start of the next row, so it is not produced
        let g = geom(&[1, 2, 3, 1], &[1, 2, 1, 1], Padding::Same, (1, 1));
        let input: Vec<f32> = (1..=6).map(|i| i as f32).collect();
        let out = kn2row(&input, &[1.0, 1.0], &g, 64, 0, &counter()).unwrap();
        assert_eq!(out, vec![3.0, 5.0, 9.0, 11.0]);
    }

    #[test]
    fn test_empty_output() {
        let g = geom(&[1, 2, 2, 1], &[5, 5, 1, 1], Padding::Valid, (1, 1));
        let out = kn2row(&[1.0; 4], &[1.0; 25], &g, 64, 0, &counter()).unwrap();
        assert!(out.is_empty());
    }
}
