//! Masking of sensitive values in log and error output.
//!
//! Revealing secrets is an explicit, per-run choice carried in configuration
//! and threaded through components rather than a process-wide toggle.

use std::fmt;

/// A sensitive value prepared for display.
///
/// Renders as `*****` unless the caller opted in to revealing secrets.
#[derive(Clone, Copy, Debug)]
pub struct Masked<'a> {
    value: &'a str,
    reveal: bool,
}

/// Wraps `value` for log output, masking it unless `reveal` is set.
#[must_use]
pub const fn masked(value: &str, reveal: bool) -> Masked<'_> {
    Masked { value, reveal }
}

impl fmt::Display for Masked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reveal {
            f.write_str(self.value)
        } else {
            f.write_str("*****")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::masked;

    #[test]
    fn masks_by_default() {
        assert_eq!(masked("hunter2", false).to_string(), "*****");
    }

    #[test]
    fn reveals_when_asked() {
        assert_eq!(masked("hunter2", true).to_string(), "hunter2");
    }
}
