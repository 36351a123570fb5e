//! The injected build-log sink.
//!
//! Everything the pipeline tells the user about a build's notifications
//! goes through [`BuildListener`], mirroring how the host surfaces build
//! output. Internal diagnostics use `tracing` instead.

use parking_lot::Mutex;

/// Sink for user-visible log lines attached to one build.
pub trait BuildListener: Send + Sync {
    /// Append one line of build output.
    fn log(&self, line: &str);

    /// Append one error line of build output.
    fn error(&self, line: &str) {
        self.log(line);
    }
}

/// Listener that forwards build output to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl BuildListener for TracingListener {
    fn log(&self, line: &str) {
        tracing::info!(target: "buildmail::listener", "{line}");
    }

    fn error(&self, line: &str) {
        tracing::error!(target: "buildmail::listener", "{line}");
    }
}

/// Listener that buffers lines in memory, for hosts that collect build
/// output themselves and for tests.
#[derive(Debug, Default)]
pub struct BufferListener {
    lines: Mutex<Vec<String>>,
}

impl BufferListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Whether any logged line contains the given fragment.
    #[must_use]
    pub fn contains(&self, fragment: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(fragment))
    }
}

impl BuildListener for BufferListener {
    fn log(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}
