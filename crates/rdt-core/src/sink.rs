//! [`LogSink`] implementations.

use rdt_abstract::LogSink;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// Forwards every line to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, line: &str) {
        info!(target: "rdt::protocol", "{line}");
    }
}

/// Appends each line to a file and flushes it immediately.
#[derive(Debug)]
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl LogSink for FileSink {
    fn log(&self, line: &str) {
        let mut file = &self.file;
        if let Err(e) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            warn!("log file write failed: {e}");
        }
    }
}

/// Serializes emissions from concurrent workers so lines never interleave.
#[derive(Debug)]
pub struct LockedSink<S> {
    inner: Mutex<S>,
}

impl<S: LogSink> LockedSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl<S: LogSink> LogSink for LockedSink<S> {
    fn log(&self, line: &str) {
        match self.inner.lock() {
            Ok(inner) => inner.log(line),
            // A worker panicked mid-line; keep logging.
            Err(poisoned) => poisoned.into_inner().log(line),
        }
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> LogSink for FnSink<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        (self.0)(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn file_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!("rdt-sink-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let sink = FileSink::append(&path).unwrap();
            sink.log("first");
            sink.log("second");
        }
        let sink = FileSink::append(&path).unwrap();
        sink.log("third");

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "first\nsecond\nthird\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn locked_sink_keeps_every_line_whole() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let collected = Arc::clone(&lines);
        let sink = Arc::new(LockedSink::new(FnSink(move |line: &str| {
            collected.lock().unwrap().push(line.to_string())
        })));

        let workers: Vec<_> = (0..4)
            .map(|w| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for i in 0..50 {
                        sink.log(&format!("worker {w} line {i}"));
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 200);
        assert!(lines.iter().all(|l| l.starts_with("worker ")));
    }
}
