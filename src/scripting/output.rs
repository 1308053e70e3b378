//! Output sink capturing text printed by scripts.
//!
//! The sink runs in one of two modes fixed at construction:
//!
//! - **Buffering**: text accumulates in an internal buffer capped at a number of
//!   characters (10,000,000 by default). Once the cap is reached further writes are
//!   silently dropped, which bounds memory against a script printing in a tight loop.
//! - **Streaming**: every write is handed straight to a caller-supplied callback and
//!   nothing is retained, so [`OutputSink::results`] is always empty.
//!
//! Backends hold a [`SharedSink`] because writes happen on pool workers while the
//! engine resets and reads the sink from the caller's thread.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default character cap for buffering mode.
pub const DEFAULT_MAX_CHARS: usize = 10_000_000;

/// Callback receiving streamed output.
pub type OutputCallback = Box<dyn Fn(&str) + Send + Sync>;

enum Mode {
    Buffer {
        text: String,
        chars: usize,
        max_chars: usize,
    },
    Stream(OutputCallback),
}

/// Accumulates or forwards script output.
pub struct OutputSink {
    mode: Mode,
    line_open: bool,
    break_pending: bool,
}

impl OutputSink {
    /// Buffering sink holding at most `max_chars` characters.
    pub fn buffered(max_chars: usize) -> Self {
        Self {
            mode: Mode::Buffer {
                text: String::new(),
                chars: 0,
                max_chars,
            },
            line_open: false,
            break_pending: false,
        }
    }

    /// Streaming sink forwarding every write to `callback`.
    pub fn streaming(callback: OutputCallback) -> Self {
        Self {
            mode: Mode::Stream(callback),
            line_open: false,
            break_pending: false,
        }
    }

    /// Append script output.
    ///
    /// Text following an exception message starts on a new line.
    pub fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.break_pending && !text.starts_with('\n') {
            self.emit("\n");
        }
        self.break_pending = false;
        self.emit(text);
        self.line_open = !text.ends_with('\n');
    }

    /// Append an error message on its own line.
    pub fn write_exception(&mut self, message: &str) {
        if self.line_open {
            self.emit("\n");
        }
        self.emit(message);
        self.line_open = !message.ends_with('\n');
        self.break_pending = self.line_open;
    }

    fn emit(&mut self, text: &str) {
        match &mut self.mode {
            Mode::Buffer {
                text: buffer,
                chars,
                max_chars,
            } => {
                let remaining = max_chars.saturating_sub(*chars);
                if remaining == 0 {
                    return;
                }
                // Byte offset of the first char that would overflow the cap.
                match text.char_indices().nth(remaining) {
                    Some((cut, _)) => {
                        buffer.push_str(&text[..cut]);
                        *chars += remaining;
                    }
                    None => {
                        buffer.push_str(text);
                        *chars += text.chars().count();
                    }
                }
            }
            Mode::Stream(callback) => callback(text),
        }
    }

    /// Clear accumulated text. No-op when streaming, where the line state
    /// carries over to the next run.
    pub fn reset(&mut self) {
        if let Mode::Buffer { text, chars, .. } = &mut self.mode {
            text.clear();
            *chars = 0;
            self.line_open = false;
            self.break_pending = false;
        }
    }

    /// Accumulated text; empty when streaming.
    pub fn results(&self) -> String {
        match &self.mode {
            Mode::Buffer { text, .. } => text.clone(),
            Mode::Stream(_) => String::new(),
        }
    }

    /// Number of buffered characters.
    pub fn len_chars(&self) -> usize {
        match &self.mode {
            Mode::Buffer { chars, .. } => *chars,
            Mode::Stream(_) => 0,
        }
    }

    /// Whether the buffer has reached its cap.
    pub fn is_full(&self) -> bool {
        match &self.mode {
            Mode::Buffer {
                chars, max_chars, ..
            } => chars >= max_chars,
            Mode::Stream(_) => false,
        }
    }

    /// Whether this sink forwards to a callback.
    pub fn is_streaming(&self) -> bool {
        matches!(self.mode, Mode::Stream(_))
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::buffered(DEFAULT_MAX_CHARS)
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            Mode::Buffer {
                chars, max_chars, ..
            } => f
                .debug_struct("OutputSink")
                .field("mode", &"buffer")
                .field("chars", chars)
                .field("max_chars", max_chars)
                .finish(),
            Mode::Stream(_) => f
                .debug_struct("OutputSink")
                .field("mode", &"stream")
                .finish(),
        }
    }
}

/// Thread-safe handle to an [`OutputSink`].
///
/// A panicking writer never disables the sink: a poisoned lock is recovered.
#[derive(Debug, Clone)]
pub struct SharedSink {
    inner: Arc<Mutex<OutputSink>>,
}

impl SharedSink {
    /// Share `sink` between the engine and its backend.
    pub fn new(sink: OutputSink) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutputSink> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`OutputSink::write`].
    pub fn write(&self, text: &str) {
        self.lock().write(text);
    }

    /// See [`OutputSink::write_exception`].
    pub fn write_exception(&self, message: &str) {
        self.lock().write_exception(message);
    }

    /// See [`OutputSink::reset`].
    pub fn reset(&self) {
        self.lock().reset();
    }

    /// See [`OutputSink::results`].
    pub fn results(&self) -> String {
        self.lock().results()
    }

    /// See [`OutputSink::len_chars`].
    pub fn len_chars(&self) -> usize {
        self.lock().len_chars()
    }

    /// See [`OutputSink::is_streaming`].
    pub fn is_streaming(&self) -> bool {
        self.lock().is_streaming()
    }
}

impl Default for SharedSink {
    fn default() -> Self {
        Self::new(OutputSink::default())
    }
}
