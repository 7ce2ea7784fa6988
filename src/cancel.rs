use crate::error::{FlowAnalysisError, FlowResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation signal shared between a caller and the analyses
/// it started. Checked once per processed block and at every callee fork.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check(&self) -> FlowResult<()> {
        if self.is_cancelled() {
            Err(FlowAnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}
