use crate::backend::ComputeBackend;
use crate::conv::{Conv2dGeometry, Padding};
use crate::counter::FlushCounter;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// A dense f32 tensor.
///
/// Holds contiguous, row-major data with an associated shape. Operations that
/// require computation are dispatched to a `ComputeBackend` together with the
/// flush threshold and the counter that should receive flush events.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
}

impl Tensor {
    /// Create a new tensor from f32 data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor { data, shape }
    }

    /// Fallible counterpart of [`Tensor::new`].
    pub fn from_vec(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape })
    }

    /// Create a zero-filled tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        Tensor {
            data: vec![0.0; shape.numel()],
            shape,
        }
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the underlying data as an f32 slice.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consumes the tensor, returning its data.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            data: self.data.clone(),
            shape: new_shape,
        })
    }

    /// Flush every element whose exponent field is below `threshold`.
    ///
    /// Takes the tensor by value: with `threshold == 0` it is handed back
    /// untouched, otherwise its buffer is flushed in place.
    pub fn flush(
        mut self,
        threshold: u32,
        backend: &dyn ComputeBackend,
        counter: &FlushCounter,
    ) -> Result<Tensor> {
        if threshold == 0 {
            return Ok(self);
        }
        backend.flush(&mut self.data, threshold, counter)?;
        Ok(self)
    }

    /// Matrix multiplication of two 2D tensors using the given backend.
    ///
    /// self is [m, k], other is [k, n], result is [m, n].
    pub fn matmul(
        &self,
        other: &Tensor,
        threshold: u32,
        backend: &dyn ComputeBackend,
        counter: &FlushCounter,
    ) -> Result<Tensor> {
        let (m, k) = self.shape.dims2()?;
        let (k2, n) = other.shape.dims2()?;
        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }

        let result = backend.matmul(&self.data, &other.data, m, k, n, threshold, counter)?;
        Ok(Tensor::new(result, Shape::new(vec![m, n])))
    }

    /// 2-D convolution of this NHWC tensor with a `[KH, KW, Cin, Cout]`
    /// kernel.
    pub fn conv2d(
        &self,
        kernel: &Tensor,
        padding: Padding,
        strides: (usize, usize),
        threshold: u32,
        backend: &dyn ComputeBackend,
        counter: &FlushCounter,
    ) -> Result<Tensor> {
        let geom = Conv2dGeometry::new(&self.shape, &kernel.shape, padding, strides)?;
        let result = backend.conv2d(&self.data, &kernel.data, &geom, threshold, counter)?;
        Ok(Tensor::new(result, geom.output_shape()))
    }

    /// Add a rank-1 `bias` along the innermost axis with flushing.
    pub fn add_bias(
        mut self,
        bias: &Tensor,
        threshold: u32,
        backend: &dyn ComputeBackend,
        counter: &FlushCounter,
    ) -> Result<Tensor> {
        bias.shape.expect_rank(1)?;
        if bias.shape.dim(0) != self.shape.last_dim() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.shape.last_dim()],
                got: bias.shape.dims().to_vec(),
            });
        }
        backend.add_bias(&mut self.data, &bias.data, threshold, counter)?;
        Ok(self)
    }
}
