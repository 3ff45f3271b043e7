// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Recognized launch options (spec.md §6). Parsing these out of a
//! launch.json/CLI invocation is an external collaborator's job; this is
//! the plain struct a host populates before calling [`crate::DebugSession::connect`].

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    None,
    Information,
    Debug,
}

impl Verbosity {
    /// The `tracing` level this verbosity maps to, applied only to this
    /// crate's own log target so a host application's unrelated logging is
    /// left alone.
    pub fn as_tracing_level(self) -> Option<tracing::Level> {
        match self {
            Verbosity::None => None,
            Verbosity::Information => Some(tracing::Level::INFO),
            Verbosity::Debug => Some(tracing::Level::DEBUG),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial port name or `host:port` (spec.md §6).
    pub device: String,
    pub baud_rate: u32,
    pub verbosity: Verbosity,
    pub stop_on_entry: bool,
    pub break_on_all: bool,
    pub break_on_uncaught: bool,
    pub clr_only_reboot: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            device: String::new(),
            baud_rate: 921_600,
            verbosity: Verbosity::Information,
            stop_on_entry: false,
            break_on_all: false,
            break_on_uncaught: true,
            clr_only_reboot: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.baud_rate, 921_600);
        assert!(config.break_on_uncaught);
        assert!(!config.break_on_all);
        assert!(!config.stop_on_entry);
    }
}
