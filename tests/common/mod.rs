#![allow(dead_code)]

use std::borrow::Cow;
use std::sync::{Arc, Mutex};

use metered_retry::{
    ErrorKind, InstantSleeper, MeteredRetry, MetricsRegistry, RetryConfig, TrackingSleeper,
};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("request timed out")]
    Timeout,
    #[error("service unavailable")]
    Unavailable,
}

impl ErrorKind for ServiceError {
    fn error_kind(&self) -> Cow<'_, str> {
        match self {
            ServiceError::Timeout => Cow::Borrowed("Timeout"),
            ServiceError::Unavailable => Cow::Borrowed("Unavailable"),
        }
    }
}

pub fn registry() -> Arc<MetricsRegistry> {
    Arc::new(MetricsRegistry::new())
}

/// Metered retry on `prefix` that never really sleeps.
pub fn instant_retry(
    registry: &Arc<MetricsRegistry>,
    prefix: &str,
    max_attempts: usize,
) -> MeteredRetry<ServiceError> {
    MeteredRetry::builder(registry.clone())
        .config(RetryConfig::new(prefix).with_max_attempts(max_attempts))
        .with_sleeper(InstantSleeper)
        .build()
        .expect("valid config")
}

pub fn tracking_retry(
    registry: &Arc<MetricsRegistry>,
    config: RetryConfig,
    sleeper: &TrackingSleeper,
) -> MeteredRetry<ServiceError> {
    MeteredRetry::builder(registry.clone())
        .config(config)
        .with_sleeper(sleeper.clone())
        .build()
        .expect("valid config")
}

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber and return everything it logged.
pub fn capture_logs<F: FnOnce()>(f: F) -> String {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_max_level(tracing::Level::DEBUG)
        .with_target(true)
        .with_ansi(false)
        .without_time()
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}
