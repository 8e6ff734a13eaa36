//! Fixed per-mode policy deciding what is mirrored and what is buffered.
use crate::types::{RuntimeMode, Severity};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeverityPolicy {
    pub mirror_to_console: bool,
    pub min_buffered: Severity,
}

const DEVELOPMENT: SeverityPolicy = SeverityPolicy {
    mirror_to_console: true,
    min_buffered: Severity::Debug,
};

const PRODUCTION: SeverityPolicy = SeverityPolicy {
    mirror_to_console: false,
    min_buffered: Severity::Warn,
};

impl SeverityPolicy {
    pub const fn for_mode(mode: RuntimeMode) -> Self {
        match mode {
            RuntimeMode::Development => DEVELOPMENT,
            RuntimeMode::Production => PRODUCTION,
        }
    }

    pub fn buffers(&self, severity: Severity) -> bool {
        severity >= self.min_buffered
    }
}
