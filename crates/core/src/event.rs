// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::Breakpoint;

/// Why execution stopped, reported on a `stopped` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    Step,
    Pause,
    Entry,
    Exception,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Breakpoint => "breakpoint",
            StopReason::Step => "step",
            StopReason::Pause => "pause",
            StopReason::Entry => "entry",
            StopReason::Exception => "exception",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    Console,
    Stdout,
}

impl OutputCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputCategory::Console => "console",
            OutputCategory::Stdout => "stdout",
        }
    }
}

/// Northbound events the facade emits (spec.md §6), delivered in emission
/// order through a single event sink.
#[derive(Debug, Clone)]
pub enum Event {
    Initialized,
    Stopped {
        reason: StopReason,
        thread_id: i64,
        all_threads_stopped: bool,
        hit_breakpoint_ids: Option<Vec<i64>>,
        text: Option<String>,
    },
    BreakpointChanged {
        breakpoint: Breakpoint,
    },
    Output {
        category: OutputCategory,
        text: String,
    },
    Terminated,
}
