use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::service::{Logger, SerialStore};

/// In-memory, process-local serial counter. Not durable; suitable for
/// unit tests and local development only.
pub struct MemorySerialStore {
    counter: AtomicU64,
    log: Arc<dyn Logger>,
}

impl MemorySerialStore {
    pub fn new(log: Arc<dyn Logger>) -> Self {
        MemorySerialStore {
            counter: AtomicU64::new(0),
            log,
        }
    }
}

#[async_trait]
impl SerialStore for MemorySerialStore {
    async fn next(&self) -> Result<u64> {
        let serial = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.debug(
            "serial allocated (memory)",
            &[("serial".to_string(), serial.to_string())],
        );
        Ok(serial)
    }
}
