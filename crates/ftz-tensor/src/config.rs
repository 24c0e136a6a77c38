use std::str::FromStr;

use crate::error::{Result, TensorError};

/// Default tile extent along every matmul dimension.
pub const DEFAULT_BLOCK_SIZE: usize = 64;
/// Default number of elements per parallel task in elementwise flushing.
pub const DEFAULT_FLUSH_CHUNK: usize = 4096;

/// Tuning knobs for the CPU kernels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Worker threads in the backend's pool. The flush counter paired with
    /// the backend must have at least this many slots.
    pub num_workers: usize,
    /// Tile extent for the blocked matmul.
    pub block_size: usize,
    /// Elements per task for elementwise flushing.
    pub flush_chunk: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let num_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        KernelConfig {
            num_workers,
            block_size: DEFAULT_BLOCK_SIZE,
            flush_chunk: DEFAULT_FLUSH_CHUNK,
        }
    }
}

impl KernelConfig {
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_flush_chunk(mut self, flush_chunk: usize) -> Self {
        self.flush_chunk = flush_chunk;
        self
    }

    /// Defaults overlaid with `FTZ_NUM_WORKERS`, `FTZ_BLOCK_SIZE` and
    /// `FTZ_FLUSH_CHUNK` when set.
    pub fn from_env() -> Result<KernelConfig> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`KernelConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<KernelConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = KernelConfig::default();
        if let Some(v) = parse_var(&lookup, "FTZ_NUM_WORKERS")? {
            config.num_workers = v;
        }
        if let Some(v) = parse_var(&lookup, "FTZ_BLOCK_SIZE")? {
            config.block_size = v;
        }
        if let Some(v) = parse_var(&lookup, "FTZ_FLUSH_CHUNK")? {
            config.flush_chunk = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero-sized settings.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(TensorError::Config("num_workers must be > 0".to_string()));
        }
        if self.block_size == 0 {
            return Err(TensorError::Config("block_size must be > 0".to_string()));
        }
        if self.flush_chunk == 0 {
            return Err(TensorError::Config("flush_chunk must be > 0".to_string()));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            TensorError::Config(format!("{}={:?}: {}", key, raw, e))
        }),
    }
}
