// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Execution State Machine (C5): running/stopped tracking and the
//! background poller that watches for device stops (spec.md §4.5).
//!
//! The poller only detects and forwards; it never mutates session state or
//! emits a public event directly. It hands a [`RawStop`] to the facade over
//! a channel, and the facade does classification and state mutation on its
//! own thread (spec.md §9, "avoid lock coupling").

use clrbridge_core::BridgeError;
use clrbridge_transport::protocol::{DeviceOperation, DeviceReply, WireBreakpointStatus};
use clrbridge_transport::{TransportError, WireTransport, QUERY_TIMEOUT};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_TICK: Duration = Duration::from_millis(50);
const REBOOT_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Disconnected,
    Connecting,
    ConnectedStopped,
    ConnectedRunning,
}

/// What the poller observed on the tick it decided to stop watching.
/// Carries raw device data only; classifying it into a [`clrbridge_core::StopReason`]
/// needs the breakpoint table, which the poller does not have access to.
#[derive(Debug, Clone)]
pub struct RawStop {
    pub execution_mode: u32,
    pub breakpoint_status: Option<WireBreakpointStatus>,
    pub thread_id: i64,
    pub stack_top_ip: Option<u32>,
    pub stack_top_method_index: Option<u32>,
}

/// Why the poller gave up without ever observing a stop.
#[derive(Debug, Clone)]
pub enum PollerOutcome {
    Stopped(RawStop),
    TransportLost(String),
    Superseded,
}

/// Owns the single live poller thread. Spawning a new one bumps a shared
/// generation counter; the previous thread observes the mismatch on its
/// next tick and exits without sending anything (spec.md §4.5: "starting a
/// new one cancels the prior").
pub struct Poller {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Poller {
    pub fn spawn(
        transport: Arc<WireTransport>,
        generation: Arc<AtomicU64>,
        result: Sender<PollerOutcome>,
    ) -> Self {
        let my_generation = generation.fetch_add(1, Ordering::SeqCst) + 1;
        let thread_generation = generation.clone();

        let handle = std::thread::spawn(move || {
            loop {
                if thread_generation.load(Ordering::SeqCst) != my_generation {
                    return;
                }

                match transport.request(DeviceOperation::GetExecutionMode, QUERY_TIMEOUT) {
                    Ok(DeviceReply::ExecutionMode { mask }) => {
                        if mask & clrbridge_transport::protocol::EXECUTION_MODE_STOPPED != 0 {
                            let raw = poll_stop_detail(&transport, mask);
                            let _ = result.send(PollerOutcome::Stopped(raw));
                            return;
                        }
                    }
                    Ok(_) => {
                        tracing::warn!("unexpected reply polling execution mode");
                    }
                    Err(TransportError::Timeout) => {}
                    Err(e) => {
                        let _ = result.send(PollerOutcome::TransportLost(e.to_string()));
                        return;
                    }
                }

                std::thread::sleep(POLL_TICK);
            }
        });

        Poller { generation, my_generation, handle: Some(handle) }
    }

    /// Invalidates this poller without waiting for its thread: the next
    /// tick it takes will see the generation mismatch and exit on its own.
    pub fn cancel(&self) {
        self.generation.compare_exchange(
            self.my_generation,
            self.my_generation.wrapping_add(1),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ).ok();
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

fn poll_stop_detail(transport: &WireTransport, execution_mode: u32) -> RawStop {
    let breakpoint_status = match transport.request(DeviceOperation::GetBreakpointStatus, QUERY_TIMEOUT) {
        Ok(DeviceReply::BreakpointStatus(status)) => status,
        _ => None,
    };

    let thread_id = match transport.request(DeviceOperation::GetThreadList, QUERY_TIMEOUT) {
        Ok(DeviceReply::ThreadList(threads)) => threads.first().copied().unwrap_or(1),
        _ => 1,
    };

    let (stack_top_ip, stack_top_method_index) =
        match transport.request(DeviceOperation::GetThreadStack { thread_id }, QUERY_TIMEOUT) {
            Ok(DeviceReply::ThreadStack { frames }) => frames
                .first()
                .map(|f| (Some(f.ip), Some(f.method_index)))
                .unwrap_or((None, None)),
            _ => (None, None),
        };

    RawStop { execution_mode, breakpoint_status, thread_id, stack_top_ip, stack_top_method_index }
}

/// Device-reboot recovery wait loop (spec.md §4.5): polls
/// `get_execution_mode` until it succeeds or `REBOOT_WAIT` elapses.
pub fn wait_for_device_ready(transport: &WireTransport) -> Result<(), BridgeError> {
    let deadline = Instant::now() + REBOOT_WAIT;
    loop {
        match transport.request(DeviceOperation::GetExecutionMode, QUERY_TIMEOUT) {
            Ok(DeviceReply::ExecutionMode { .. }) => return Ok(()),
            _ => {
                if Instant::now() >= deadline {
                    return Err(BridgeError::DeviceRebooted);
                }
                std::thread::sleep(POLL_TICK);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ExecutionTracker {
    state: ExecutionState,
    stopped_thread_id: Option<i64>,
    last_thread_list: Vec<i64>,
}

impl Default for ExecutionState {
    fn default() -> Self {
        ExecutionState::Disconnected
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn stopped_thread_id(&self) -> Option<i64> {
        self.stopped_thread_id
    }

    pub fn last_thread_list(&self) -> &[i64] {
        &self.last_thread_list
    }

    pub fn set_last_thread_list(&mut self, threads: Vec<i64>) {
        self.last_thread_list = threads;
    }

    pub fn begin_connecting(&mut self) {
        self.state = ExecutionState::Connecting;
    }

    pub fn mark_connected_stopped(&mut self, thread_id: i64) {
        self.state = ExecutionState::ConnectedStopped;
        self.stopped_thread_id = Some(thread_id);
    }

    pub fn mark_running(&mut self) {
        self.state = ExecutionState::ConnectedRunning;
        self.stopped_thread_id = None;
    }

    pub fn mark_stopped(&mut self, thread_id: i64) {
        self.state = ExecutionState::ConnectedStopped;
        self.stopped_thread_id = Some(thread_id);
    }

    pub fn disconnect(&mut self) {
        self.state = ExecutionState::Disconnected;
        self.stopped_thread_id = None;
        self.last_thread_list.clear();
    }

    pub fn is_running(&self) -> bool {
        self.state == ExecutionState::ConnectedRunning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tracker_starts_disconnected() {
        let tracker = ExecutionTracker::new();
        assert_eq!(tracker.state(), ExecutionState::Disconnected);
    }

    #[test]
    fn run_then_stop_updates_thread_id() {
        let mut tracker = ExecutionTracker::new();
        tracker.begin_connecting();
        tracker.mark_connected_stopped(1);
        assert_eq!(tracker.state(), ExecutionState::ConnectedStopped);

        tracker.mark_running();
        assert!(tracker.is_running());
        assert_eq!(tracker.stopped_thread_id(), None);

        tracker.mark_stopped(3);
        assert_eq!(tracker.stopped_thread_id(), Some(3));
    }

    #[test]
    fn disconnect_clears_thread_state() {
        let mut tracker = ExecutionTracker::new();
        tracker.mark_connected_stopped(2);
        tracker.set_last_thread_list(vec![1, 2]);
        tracker.disconnect();
        assert_eq!(tracker.state(), ExecutionState::Disconnected);
        assert!(tracker.last_thread_list().is_empty());
    }

    #[test]
    fn cancelling_a_poller_bumps_the_generation() {
        let generation = Arc::new(AtomicU64::new(0));
        let start = generation.load(Ordering::SeqCst);
        generation.compare_exchange(start, start + 1, Ordering::SeqCst, Ordering::SeqCst).unwrap();
        assert_eq!(generation.load(Ordering::SeqCst), start + 1);
    }
}
