use ftz_tensor::{KernelConfig, Result, Session};

/// Opaque session handle that owns the worker pool and its flush counter.
pub struct FtzSession {
    pub session: Session,
}

impl FtzSession {
    pub fn new(config: KernelConfig) -> Result<Self> {
        Ok(Self {
            session: Session::new(config)?,
        })
    }
}
