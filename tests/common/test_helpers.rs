use async_trait::async_trait;
use ratewarden::CounterStore;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

/// Counter store whose every call fails, as if the network were down.
#[derive(Debug, Clone, Default)]
pub struct FailingStore {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CounterStore for FailingStore {
    type Error = std::io::Error;

    async fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"))
    }

    async fn get(&self, _key: &str) -> Result<Option<u64>, Self::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"))
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, Self::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<(), Self::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"))
    }
}

/// Counter store that never answers.
#[derive(Debug, Clone, Default)]
pub struct SlowStore;

#[async_trait]
impl CounterStore for SlowStore {
    type Error = std::io::Error;

    async fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, Self::Error> {
        std::future::pending().await
    }

    async fn get(&self, _key: &str) -> Result<Option<u64>, Self::Error> {
        std::future::pending().await
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, Self::Error> {
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> Result<(), Self::Error> {
        std::future::pending().await
    }
}

/// In-memory log buffer for asserting on emitted tracing output.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Install a thread-local subscriber writing into this buffer.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(self.clone()))
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
