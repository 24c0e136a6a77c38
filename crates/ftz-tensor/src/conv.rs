//! Convolution geometry shared by every backend.
//!
//! Layouts are NHWC for inputs/outputs and `[KH, KW, Cin, Cout]` for kernels.
//! Output pixels are anchored on the kernel centre `(k - 1) / 2`, so even
//! kernels see one more tap after the centre than before it.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// Spatial padding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Padding {
    /// Pad by `(k - 1) / 2` on every side before striding and cropping.
    Same,
    /// No padding.
    Valid,
}

impl FromStr for Padding {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "same" => Ok(Padding::Same),
            "valid" => Ok(Padding::Valid),
            _ => Err(TensorError::InvalidPadding(s.to_string())),
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Padding::Same => write!(f, "same"),
            Padding::Valid => write!(f, "valid"),
        }
    }
}

/// Validated shape description of one 2-D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub batch: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub in_c: usize,
    pub k_h: usize,
    pub k_w: usize,
    pub out_c: usize,
    pub padding: Padding,
    pub stride_h: usize,
    pub stride_w: usize,
}

impl Conv2dGeometry {
    /// Build the geometry for an NHWC `input` and a `[KH, KW, Cin, Cout]`
    /// `kernel`.
    pub fn new(
        input: &Shape,
        kernel: &Shape,
        padding: Padding,
        strides: (usize, usize),
    ) -> Result<Self> {
        let [batch, in_h, in_w, in_c] = input.dims4()?;
        let [k_h, k_w, k_c, out_c] = kernel.dims4()?;
        if in_c != k_c {
            return Err(TensorError::ChannelMismatch {
                input: in_c,
                kernel: k_c,
            });
        }
        if k_h == 0 || k_w == 0 {
            return Err(TensorError::Other(format!(
                "kernel spatial size must be non-zero, got {}",
                kernel
            )));
        }
        let (stride_h, stride_w) = strides;
        if stride_h == 0 || stride_w == 0 {
            return Err(TensorError::InvalidStride(stride_h, stride_w));
        }
        Ok(Conv2dGeometry {
            batch,
            in_h,
            in_w,
            in_c,
            k_h,
            k_w,
            out_c,
            padding,
            stride_h,
            stride_w,
        })
    }

    /// Kernel-centre offset along the height axis, `(KH - 1) / 2`.
    pub fn pad_h(&self) -> usize {
        (self.k_h - 1) / 2
    }

    /// Kernel-centre offset along the width axis, `(KW - 1) / 2`.
    pub fn pad_w(&self) -> usize {
        (self.k_w - 1) / 2
    }

    /// Zero rows actually added above and below the input.
    pub fn applied_pad_h(&self) -> usize {
        match self.padding {
            Padding::Same => self.pad_h(),
            Padding::Valid => 0,
        }
    }

    /// Zero columns actually added left and right of the input.
    pub fn applied_pad_w(&self) -> usize {
        match self.padding {
            Padding::Same => self.pad_w(),
            Padding::Valid => 0,
        }
    }

    pub fn padded_h(&self) -> usize {
        self.in_h + 2 * self.applied_pad_h()
    }

    pub fn padded_w(&self) -> usize {
        self.in_w + 2 * self.applied_pad_w()
    }

    /// Pixels in one padded sample plane.
    pub fn sample_len(&self) -> usize {
        self.padded_h() * self.padded_w()
    }

    /// Number of kernel taps.
    pub fn taps(&self) -> usize {
        self.k_h * self.k_w
    }

    /// First padded row kept in the output. A stride above 1 skips one extra
    /// row past the border.
    pub fn crop_start_h(&self) -> usize {
        self.pad_h() + usize::from(self.stride_h > 1)
    }

    pub fn crop_start_w(&self) -> usize {
        self.pad_w() + usize::from(self.stride_w > 1)
    }

    /// One past the last padded row that may be kept.
    pub fn crop_end_h(&self) -> usize {
        self.padded_h()
            .saturating_sub(trailing_crop(self.k_h, self.applied_pad_h()))
    }

    pub fn crop_end_w(&self) -> usize {
        self.padded_w()
            .saturating_sub(trailing_crop(self.k_w, self.applied_pad_w()))
    }

    pub fn out_h(&self) -> usize {
        strided_len(self.crop_start_h(), self.crop_end_h(), self.stride_h)
    }

    pub fn out_w(&self) -> usize {
        strided_len(self.crop_start_w(), self.crop_end_w(), self.stride_w)
    }

    /// NHWC output shape.
    pub fn output_shape(&self) -> Shape {
        Shape::new(vec![self.batch, self.out_h(), self.out_w(), self.out_c])
    }

    /// Zero-pad an NHWC `input` to `[N, Hp, Wp, C]`; borrowed as-is when no
    /// padding applies.
    pub fn pad_input<'a>(&self, input: &'a [f32]) -> Cow<'a, [f32]> {
        let (ph, pw) = (self.applied_pad_h(), self.applied_pad_w());
        if ph == 0 && pw == 0 {
            return Cow::Borrowed(input);
        }
        let dims = [self.batch, self.in_h, self.in_w, self.in_c];
        let out = pad_nhwc(input, dims, ph, pw);
        Cow::Owned(out)
    }

    /// Signed offset of tap `(ky, kx)` within a flattened padded sample plane.
    pub fn tap_offset(&self, ky: usize, kx: usize) -> isize {
        let dy = ky as isize - self.pad_h() as isize;
        let dx = kx as isize - self.pad_w() as isize;
        dy * self.padded_w() as isize + dx
    }
}

/// Positions dropped after the last kept one along an axis.
///
/// Taps reach `k - 1 - pad` past the centre, one more than `pad` for even
/// kernels. That extra tap lands on the zero border when padding was applied;
/// without padding it would read the next image row, so the position is
/// dropped.
fn trailing_crop(k: usize, applied_pad: usize) -> usize {
    let pad = (k - 1) / 2;
    if applied_pad == 0 {
        k - 1 - pad
    } else {
        pad
    }
}

/// Zero-pad NHWC `input` of `dims` by `ph` rows and `pw` columns on each
/// side.
fn pad_nhwc(input: &[f32], dims: [usize; 4], ph: usize, pw: usize) -> Vec<f32> {
    let [n, h, w, c] = dims;
    let (hp, wp) = (h + 2 * ph, w + 2 * pw);
    let row_len = w * c;
    let mut out = vec![0.0f32; n * hp * wp * c];
    for s in 0..n {
        for y in 0..h {
            let src = (s * h + y) * row_len;
            let dst = ((s * hp + y + ph) * wp + pw) * c;
            out[dst..dst + row_len].copy_from_slice(&input[src..src + row_len]);
        }
    }
    out
}

fn strided_len(start: usize, end: usize, stride: usize) -> usize {
    if end > start {
        (end - start).div_ceil(stride)
    } else {
        0
    }
}
