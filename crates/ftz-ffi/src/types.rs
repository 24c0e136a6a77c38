use ftz_tensor::{KernelConfig, Padding, TensorError};

/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FtzStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorShape = 2,
    ErrorCapacity = 3,
    ErrorConfig = 4,
    ErrorInternal = 5,
}

impl From<&TensorError> for FtzStatus {
    fn from(err: &TensorError) -> Self {
        match err {
            TensorError::ShapeMismatch { .. }
            | TensorError::MatmulMismatch { .. }
            | TensorError::InvalidRank { .. }
            | TensorError::ChannelMismatch { .. } => FtzStatus::ErrorShape,
            TensorError::InvalidPadding(_) | TensorError::InvalidStride(..) => {
                FtzStatus::ErrorInvalidArgument
            }
            TensorError::WorkerCapacity { .. } | TensorError::SlotOutOfRange { .. } => {
                FtzStatus::ErrorCapacity
            }
            TensorError::Config(_) | TensorError::ThreadPool(_) => FtzStatus::ErrorConfig,
            TensorError::Other(_) => FtzStatus::ErrorInternal,
        }
    }
}

/// Convolution padding selector.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub enum FtzPadding {
    Same = 0,
    Valid = 1,
}

impl From<FtzPadding> for Padding {
    fn from(p: FtzPadding) -> Self {
        match p {
            FtzPadding::Same => Padding::Same,
            FtzPadding::Valid => Padding::Valid,
        }
    }
}

/// Kernel tuning passed to `ftz_session_create`. A zero field keeps the
/// default for that setting.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct FtzConfig {
    pub num_workers: u32,
    pub block_size: u32,
    pub flush_chunk: u32,
}

impl FtzConfig {
    pub fn to_kernel_config(&self) -> KernelConfig {
        let mut config = KernelConfig::default();
        if self.num_workers > 0 {
            config.num_workers = self.num_workers as usize;
        }
        if self.block_size > 0 {
            config.block_size = self.block_size as usize;
        }
        if self.flush_chunk > 0 {
            config.flush_chunk = self.flush_chunk as usize;
        }
        config
    }
}
