//! Line-prefixing log sink shared by concurrent operations.
//!
//! One underlying writer sits behind one mutex. Callers obtain a
//! [`PrefixWriter`] per logical task; a writer only prepends its prefix to
//! every line and forwards the whole buffer under the lock, so lines from
//! different tasks never interleave mid-line.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Shared output sink.
#[derive(Clone)]
pub struct PrefixedLogger {
    sink: Sink,
}

impl PrefixedLogger {
    /// Wrap an arbitrary writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Log to standard error.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Drop everything.
    pub fn discard() -> Self {
        Self::new(io::sink())
    }

    /// Create a writer that prefixes every line with `prefix`.
    pub fn writer(&self, prefix: impl Into<String>) -> PrefixWriter {
        PrefixWriter {
            prefix: prefix.into(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl fmt::Debug for PrefixedLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixedLogger").finish_non_exhaustive()
    }
}

/// Per-task view of a [`PrefixedLogger`].
#[derive(Clone)]
pub struct PrefixWriter {
    prefix: String,
    sink: Sink,
}

impl PrefixWriter {
    /// Write one message; a trailing newline is added when missing.
    pub fn line(&self, message: impl fmt::Display) {
        // Progress output must never fail the operation it describes.
        let _ = self.emit(message.to_string().as_bytes());
    }

    fn emit(&self, data: &[u8]) -> io::Result<()> {
        let framed = frame(&self.prefix, data);
        let mut sink = self.sink.lock();
        sink.write_all(&framed)?;
        sink.flush()
    }
}

impl Write for PrefixWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.emit(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.lock().flush()
    }
}

/// Prefix every line of `data` and terminate it with exactly one newline.
fn frame(prefix: &str, data: &[u8]) -> Vec<u8> {
    let body = data.strip_suffix(b"\n").unwrap_or(data);
    let mut out = Vec::with_capacity(body.len() + prefix.len() * 2 + 1);
    out.extend_from_slice(prefix.as_bytes());
    for &byte in body {
        out.push(byte);
        if byte == b'\n' {
            out.extend_from_slice(prefix.as_bytes());
        }
    }
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    #[test]
    fn test_frame_single_line() {
        assert_eq!(frame("copy | ", b"hello\n"), b"copy | hello\n".to_vec());
        assert_eq!(frame("copy | ", b"hello"), b"copy | hello\n".to_vec());
    }

    #[test]
    fn test_frame_multi_line() {
        assert_eq!(
            frame("> ", b"one\ntwo\n"),
            b"> one\n> two\n".to_vec()
        );
    }

    #[test]
    fn test_write_returns_original_length() {
        let buf = SharedBuf::default();
        let logger = PrefixedLogger::new(buf.clone());
        let mut writer = logger.writer("x | ");
        let n = writer.write(b"abc\n").unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf.contents(), "x | abc\n");
    }

    #[test]
    fn test_line_helper() {
        let buf = SharedBuf::default();
        let logger = PrefixedLogger::new(buf.clone());
        logger.writer("pull | ").line(format_args!("{} files", 3));
        assert_eq!(buf.contents(), "pull | 3 files\n");
    }

    #[test]
    fn test_concurrent_writers_do_not_interleave_lines() {
        let buf = SharedBuf::default();
        let logger = PrefixedLogger::new(buf.clone());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let writer = logger.writer(format!("w{i} | "));
                thread::spawn(move || {
                    for j in 0..50 {
                        writer.line(format!("message {j} from {i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let contents = buf.contents();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 400);
        for line in lines {
            let (prefix, rest) = line.split_once(" | ").unwrap();
            let id = prefix.trim_start_matches('w');
            assert!(rest.ends_with(&format!("from {id}")), "interleaved: {line}");
        }
    }

    #[test]
    fn test_discard_accepts_writes() {
        let logger = PrefixedLogger::discard();
        let mut writer = logger.writer("ignored");
        assert_eq!(writer.write(b"data").unwrap(), 4);
    }
}
