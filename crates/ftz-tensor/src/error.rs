use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("expected a rank-{expected} tensor, got shape {got:?}")]
    InvalidRank { expected: usize, got: Vec<usize> },
    #[error("channel mismatch: input has {input} channels, kernel expects {kernel}")]
    ChannelMismatch { input: usize, kernel: usize },
    #[error("unknown padding mode '{0}' (expected 'same' or 'valid')")]
    InvalidPadding(String),
    #[error("invalid stride ({0}, {1}): strides must be >= 1")]
    InvalidStride(usize, usize),
    #[error("{workers} workers exceed the flush counter capacity of {slots} slots")]
    WorkerCapacity { workers: usize, slots: usize },
    #[error("worker slot {slot} out of range for a counter with {slots} slots")]
    SlotOutOfRange { slot: usize, slots: usize },
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
