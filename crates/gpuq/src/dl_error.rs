//! Diagnostics collected while opening vendor libraries.
//!
//! Every failed `dlopen`/`dlsym` attempt adds one bullet line, so a caller
//! that sees a provider reported as unavailable can print the full history of
//! what was tried.

use std::fmt::Display;
use std::fmt::Write;
use std::sync::Mutex;
use std::sync::MutexGuard;

const BULLET: &str = " * ";
const SEPARATOR: char = '\n';

/// Process-wide buffer shared by all providers.
pub static DL_ERRORS: Mutex<ErrorAccumulator> = Mutex::new(ErrorAccumulator::new());

/// Append-or-reset text buffer of loader errors.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorAccumulator {
    buffer: String,
}

impl ErrorAccumulator {
    pub const fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Records the pending loader error, if any.
    ///
    /// With nothing pending, `append` keeps the buffer as is while a reset
    /// (`append == false`) clears it. With a pending error, a reset first
    /// drops the old content, then the error is added as `" * <err>"`,
    /// separated from earlier lines by a newline.
    pub fn record(&mut self, err: Option<&dyn Display>, append: bool) {
        if !append {
            self.buffer.clear();
        }

        let Some(err) = err else {
            return;
        };

        if !self.buffer.is_empty() {
            self.buffer.push(SEPARATOR);
        }
        self.buffer.push_str(BULLET);
        // writing into a String cannot fail
        let _ = write!(self.buffer, "{err}");
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of lines in the buffer, one per failure unless an error text
    /// spans several lines itself.
    pub fn lines(&self) -> usize {
        if self.buffer.is_empty() {
            0
        } else {
            self.buffer.lines().count()
        }
    }
}

/// Locks an accumulator, recovering from poisoning.
///
/// Every `record` call leaves the buffer consistent, so a panic elsewhere
/// while the lock was held cannot have corrupted it.
pub(crate) fn lock(errors: &Mutex<ErrorAccumulator>) -> MutexGuard<'_, ErrorAccumulator> {
    errors
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// [`ErrorAccumulator::record`] on the process-wide buffer.
pub fn record_error(err: Option<&dyn Display>, append: bool) {
    lock(&DL_ERRORS).record(err, append);
}

/// Accumulated loader diagnostics, `None` when nothing failed since the last
/// reset.
pub fn last_dl_error() -> Option<String> {
    let errors = lock(&DL_ERRORS);
    if errors.is_empty() {
        None
    } else {
        Some(errors.as_str().to_owned())
    }
}

pub fn reset_dl_error() {
    record_error(None, false);
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    fn with_lines(lines: &[&str]) -> ErrorAccumulator {
        let mut acc = ErrorAccumulator::new();
        for line in lines {
            acc.record(Some(line), true);
        }
        acc
    }

    #[test]
    fn append_without_pending_error_keeps_buffer() {
        let mut acc = with_lines(&["E1"]);
        let before = acc.clone();

        for _ in 0..5 {
            acc.record(None, true);
        }

        assert_eq!(acc, before);

        let mut empty = ErrorAccumulator::new();
        empty.record(None, true);
        assert!(empty.is_empty());
    }

    #[test]
    fn reset_without_pending_error_empties_buffer() {
        let mut acc = with_lines(&["E1", "E2", "E3"]);
        acc.record(None, false);
        assert!(acc.is_empty());
        assert_eq!(acc.len(), 0);

        acc.record(None, false);
        assert_eq!(acc.as_str(), "");
    }

    #[test]
    fn two_appended_errors_use_bullets_and_newline() {
        let acc = with_lines(&["E1", "E2"]);
        assert_eq!(acc.as_str(), " * E1\n * E2");
        assert_eq!(acc.len(), " * E1\n * E2".len());
        assert_eq!(acc.lines(), 2);
    }

    #[test]
    fn first_error_has_no_leading_separator() {
        let acc = with_lines(&["libcuda.so.1: cannot open shared object file"]);
        assert_eq!(
            acc.as_str(),
            " * libcuda.so.1: cannot open shared object file"
        );
    }

    #[test]
    fn reset_with_pending_error_replaces_history() {
        let mut acc = with_lines(&["E1", "E2"]);
        acc.record(Some(&"E3"), false);
        assert_eq!(acc.as_str(), " * E3");
        assert_eq!(acc.lines(), 1);
    }

    #[test]
    fn error_text_is_copied_verbatim() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "a * b\tc");
        let mut acc = ErrorAccumulator::new();
        acc.record(Some(&err), true);
        assert_eq!(acc.as_str(), " * a * b\tc");
    }

    #[test]
    fn empty_error_text_still_counts() {
        let mut acc = ErrorAccumulator::new();
        acc.record(Some(&""), true);
        acc.record(Some(&"E2"), true);
        assert_eq!(acc.as_str(), " * \n * E2");
    }
}
