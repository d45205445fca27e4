use crate::blob::CoreCode;
use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Named OS thread that runs one core of a blob until asked to stop.
pub struct BlobThread {
    name: String,
    /// Running flag, cleared by `request_stop`
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BlobThread {
    /// Spawn a thread calling `core` in a loop.
    pub fn spawn(name: impl Into<String>, core: CoreCode) -> Result<Self> {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    core();
                }
            })?;
        tracing::debug!("Blob thread {} started", name);

        Ok(Self {
            name,
            running,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to exit after the current core iteration.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for the thread to exit. A panic in the core code is logged.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Blob thread {} panicked", self.name);
            } else {
                tracing::debug!("Blob thread {} stopped", self.name);
            }
        }
    }
}

impl Drop for BlobThread {
    fn drop(&mut self) {
        self.request_stop();
        self.join();
    }
}
