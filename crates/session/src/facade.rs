// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Debug Session Facade (C8): the public operation surface tying C1-C7
//! together (spec.md §4, §6 Northbound). Owns Execution State, the
//! breakpoint table, and every handle arena (spec.md §3 ownership note).

use crate::breakpoints::BreakpointManager;
use crate::config::SessionConfig;
use crate::execution::{self, ExecutionState, ExecutionTracker, Poller, PollerOutcome};
use crate::stepping::{self, StepKind, StepOrigin, StepOutcome};
use crate::variables::{self, FieldNameCache, ScopeInfo};
use clrbridge_core::{
    AssemblyIndex, Breakpoint, BreakpointFlags, BridgeError, DeviceBreakpointDescriptor,
    DeviceMethodIndex, Event, FrameHandle, OutputCategory, RuntimeValue, ScopeHandle, StopReason,
    ThreadFilter, ValueHandle, VariableScopeKind,
};
use clrbridge_symbols::{AssemblyRegistry, SymbolFileLoader, SymbolResolver};
use clrbridge_transport::channel::{self, DeviceStream};
use clrbridge_transport::codec::JsonCodec;
use clrbridge_transport::protocol::{
    DeviceEvent, DeviceOperation, DeviceReply, RebootOption, WireBlob, WireDescriptor,
};
use clrbridge_transport::{TransportError, WireTransport, CONNECT_TIMEOUT, QUERY_TIMEOUT};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct FrameContext {
    thread_id: i64,
    stack_depth: u32,
    method_index: DeviceMethodIndex,
    ip: u32,
}

#[derive(Debug, Clone, Copy)]
struct ScopeContext {
    frame: FrameHandle,
    kind: VariableScopeKind,
    count: u32,
}

/// A named variable together with the [`ValueHandle`] allocated for its
/// value when that value is expandable (spec.md §3, §4.7).
#[derive(Debug, Clone)]
pub struct VariableEntry {
    pub name: String,
    pub value: RuntimeValue,
    pub handle: Option<ValueHandle>,
}

/// A child produced by [`DebugSession::expand`]: an array element or a
/// field, with its own handle if it is itself expandable.
#[derive(Debug, Clone)]
pub struct ExpandedVariable {
    pub name: String,
    pub value: RuntimeValue,
    pub handle: Option<ValueHandle>,
}

/// The result of [`DebugSession::evaluate`]: the resolved value plus a
/// handle if it can be expanded or later targeted by [`DebugSession::set_variable`].
#[derive(Debug, Clone)]
pub struct EvaluatedValue {
    pub value: RuntimeValue,
    pub handle: Option<ValueHandle>,
}

/// Exception-catching descriptors implied by the Configuration table's
/// `break_on_all`/`break_on_uncaught` options (spec.md lines 181-182).
/// Neither targets a specific method, so `method_index`/`ip` are zero and
/// the device matches on flags alone.
fn build_exception_descriptors(config: &SessionConfig) -> Vec<DeviceBreakpointDescriptor> {
    if config.break_on_all {
        vec![DeviceBreakpointDescriptor {
            id: clrbridge_core::reserved_ids::EXCEPTION_ALL,
            flags: BreakpointFlags::EXCEPTION_THROWN
                | BreakpointFlags::EXCEPTION_CAUGHT
                | BreakpointFlags::EXCEPTION_UNCAUGHT,
            thread_filter: ThreadFilter::Any,
            stack_depth: 0,
            method_index: DeviceMethodIndex(0),
            ip: 0,
            ip_start: 0,
            ip_end: 0,
        }]
    } else if config.break_on_uncaught {
        vec![DeviceBreakpointDescriptor {
            id: clrbridge_core::reserved_ids::EXCEPTION_UNCAUGHT,
            flags: BreakpointFlags::EXCEPTION_UNCAUGHT,
            thread_filter: ThreadFilter::Any,
            stack_depth: 0,
            method_index: DeviceMethodIndex(0),
            ip: 0,
            ip_start: 0,
            ip_end: 0,
        }]
    } else {
        Vec::new()
    }
}

fn descriptor_to_wire(d: &DeviceBreakpointDescriptor) -> WireDescriptor {
    WireDescriptor {
        id: d.id,
        flags: d.flags.bits(),
        thread_filter: match d.thread_filter {
            ThreadFilter::Any => clrbridge_transport::protocol::PID_ANY,
            ThreadFilter::Thread(t) => t,
        },
        stack_depth: d.stack_depth,
        method_index: d.method_index.0,
        ip: d.ip,
        ip_start: d.ip_start,
        ip_end: d.ip_end,
    }
}

/// Owns the session end to end: transport lifecycle, symbol/assembly
/// state, the breakpoint table, execution tracking, and every
/// session-scoped handle arena.
pub struct DebugSession {
    config: SessionConfig,
    transport: Option<Arc<WireTransport>>,
    registry: AssemblyRegistry,
    resolver: SymbolResolver,
    breakpoints: BreakpointManager,
    execution: ExecutionTracker,
    poller: Option<Poller>,
    poll_generation: Arc<AtomicU64>,
    raw_stop_tx: Sender<PollerOutcome>,
    raw_stop_rx: Receiver<PollerOutcome>,
    device_events_tx: Sender<DeviceEvent>,
    device_events_rx: Receiver<DeviceEvent>,
    events_tx: Sender<Event>,
    next_handle: u64,
    frames: HashMap<FrameHandle, FrameContext>,
    scopes: HashMap<ScopeHandle, ScopeContext>,
    values: HashMap<ValueHandle, RuntimeValue>,
    field_cache: FieldNameCache,
    exception_descriptors: Vec<DeviceBreakpointDescriptor>,
}

impl DebugSession {
    pub fn new(config: SessionConfig) -> (Self, Receiver<Event>) {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (raw_stop_tx, raw_stop_rx) = crossbeam_channel::unbounded();
        let (device_events_tx, device_events_rx) = crossbeam_channel::unbounded();

        if let Some(level) = config.verbosity.as_tracing_level() {
            tracing::debug!(?level, "session verbosity configured");
        }

        let session = DebugSession {
            config,
            transport: None,
            registry: AssemblyRegistry::new(),
            resolver: SymbolResolver::new(),
            breakpoints: BreakpointManager::new(),
            execution: ExecutionTracker::new(),
            poller: None,
            poll_generation: Arc::new(AtomicU64::new(0)),
            raw_stop_tx,
            raw_stop_rx,
            device_events_tx,
            device_events_rx,
            events_tx,
            next_handle: 1,
            frames: HashMap::new(),
            scopes: HashMap::new(),
            values: HashMap::new(),
            field_cache: FieldNameCache::new(),
            exception_descriptors: Vec::new(),
        };
        (session, events_rx)
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.execution.state()
    }

    pub fn resolver_mut(&mut self) -> &mut SymbolResolver {
        &mut self.resolver
    }

    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    /// Loads one symbol file through a pluggable loader (spec.md §4.3,
    /// §6). Typically called before [`Self::connect`] so breakpoints set
    /// before the device answers can already resolve. Any breakpoint left
    /// pending from an earlier `set_breakpoint` call is re-resolved against
    /// the newly loaded symbols (spec.md §8 scenario 1).
    pub fn load_symbols(
        &mut self,
        path: &std::path::Path,
        loader: &dyn SymbolFileLoader,
    ) -> Result<(), BridgeError> {
        self.resolver
            .load_symbols(path, loader)
            .map_err(|e| BridgeError::UnresolvedSymbol(e.to_string()))?;
        self.rebind_pending_breakpoints()
    }

    pub fn load_symbols_from_directory(
        &mut self,
        dir: &std::path::Path,
        recursive: bool,
        loader: &dyn SymbolFileLoader,
    ) -> Result<usize, BridgeError> {
        let count = self
            .resolver
            .load_symbols_from_directory(dir, recursive, loader)
            .map_err(|e| BridgeError::UnresolvedSymbol(e.to_string()))?;
        self.rebind_pending_breakpoints()?;
        Ok(count)
    }

    /// Re-resolves every still-pending breakpoint, pushes the device list
    /// if any became verified and a transport is live, and emits a
    /// `breakpoint{changed}` event per newly verified breakpoint (spec.md
    /// §8 scenario 1).
    fn rebind_pending_breakpoints(&mut self) -> Result<(), BridgeError> {
        let newly_verified = self.breakpoints.rebind_pending(&self.resolver, &self.registry);
        if newly_verified.is_empty() {
            return Ok(());
        }
        if self.transport.is_some() {
            self.push_active_breakpoints()?;
        }
        for id in newly_verified {
            if let Some(bp) = self.breakpoints.get(id).cloned() {
                self.emit(Event::BreakpointChanged { breakpoint: bp });
            }
        }
        Ok(())
    }

    fn transport(&self) -> Result<&Arc<WireTransport>, BridgeError> {
        self.transport.as_ref().ok_or(BridgeError::NotConnected)
    }

    fn emit(&self, event: Event) {
        let _ = self.events_tx.send(event);
    }

    fn alloc_handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    /// Frame/scope/value handles are invalidated by the next resume
    /// (spec.md §3, §8 invariant).
    fn clear_handles(&mut self) {
        self.frames.clear();
        self.scopes.clear();
        self.values.clear();
    }

    /// Allocates a [`ValueHandle`] for `value` unless it is null, so a
    /// later [`Self::expand`] (non-primitive values) or
    /// [`Self::set_variable`] (primitive values) call can address it
    /// (spec.md §3, §4.7).
    fn register_value(&mut self, value: &RuntimeValue) -> Option<ValueHandle> {
        if value.is_null {
            return None;
        }
        let handle = ValueHandle(self.alloc_handle());
        self.values.insert(handle, value.clone());
        Some(handle)
    }

    // ---- C1/C8: connection lifecycle ----------------------------------

    pub fn connect(&mut self) -> Result<(), BridgeError> {
        self.execution.begin_connecting();

        let stream: Box<dyn DeviceStream> = if let Some((host, port)) = channel::is_tcp_target(&self.config.device)
        {
            Box::new(
                channel::open_tcp(&format!("{host}:{port}"))
                    .map_err(|e| BridgeError::Transport(e.to_string()))?,
            )
        } else {
            channel::open_serial(&self.config.device, self.config.baud_rate)
                .map_err(|e| BridgeError::Transport(e.to_string()))? as Box<dyn DeviceStream>
        };

        let transport = Arc::new(WireTransport::new(
            stream,
            Box::new(JsonCodec::default()),
            self.device_events_tx.clone(),
        ));
        transport.request(DeviceOperation::Connect, CONNECT_TIMEOUT)?;
        self.transport = Some(transport);

        self.refresh_assemblies()?;

        self.exception_descriptors = build_exception_descriptors(&self.config);
        if !self.exception_descriptors.is_empty() {
            let flags = self
                .exception_descriptors
                .iter()
                .fold(BreakpointFlags::empty(), |acc, d| acc | d.flags);
            self.transport()?
                .request(DeviceOperation::UpdateDebugFlags { flags: flags.bits() }, QUERY_TIMEOUT)?;
            self.push_active_breakpoints()?;
        }

        if self.config.stop_on_entry {
            if let Some(entry) = self.resolver.get_entry_point_location() {
                let assembly_idx = self
                    .registry
                    .get_assembly_index(&entry.assembly_name)
                    .unwrap_or(AssemblyIndex(1));
                let method_index =
                    DeviceMethodIndex::new(assembly_idx, (entry.method_token.0 & 0xFFFF) as u16);
                let descriptor = DeviceBreakpointDescriptor {
                    id: clrbridge_core::reserved_ids::ENTRY_POINT,
                    flags: BreakpointFlags::HARD,
                    thread_filter: ThreadFilter::Any,
                    stack_depth: 0,
                    method_index,
                    ip: entry.il_offset,
                    ip_start: 0,
                    ip_end: 0,
                };
                let mut wire = self.all_active_descriptors();
                wire.push(descriptor);
                let wire: Vec<WireDescriptor> = wire.iter().map(descriptor_to_wire).collect();
                self.transport()?.request(DeviceOperation::SetBreakpoints(wire), QUERY_TIMEOUT)?;
            }
            self.execution.mark_connected_stopped(1);
            self.emit(Event::Stopped {
                reason: StopReason::Entry,
                thread_id: 1,
                all_threads_stopped: true,
                hit_breakpoint_ids: None,
                text: None,
            });
        } else {
            self.execution.mark_connected_stopped(1);
        }

        self.emit(Event::Initialized);
        Ok(())
    }

    fn refresh_assemblies(&mut self) -> Result<(), BridgeError> {
        let reply = self.transport()?.request(DeviceOperation::ResolveAllAssemblies, QUERY_TIMEOUT)?;
        if let DeviceReply::Assemblies(list) = reply {
            for a in list {
                self.registry.register_device_assembly(&a.name, &a.version, 0, a.index);
            }
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(poller) = self.poller.take() {
            drop(poller);
        }
        self.transport = None;
        self.registry.clear();
        self.execution.disconnect();
        self.clear_handles();
        self.emit(Event::Terminated);
    }

    /// Drains device events (e.g. UART text) that arrived outside a
    /// request/reply cycle and republishes them as `output` events.
    pub fn pump_device_events(&self) {
        while let Ok(event) = self.device_events_rx.try_recv() {
            match event {
                DeviceEvent::Message(text) => {
                    self.emit(Event::Output { category: OutputCategory::Stdout, text });
                }
            }
        }
    }

    // ---- C4: breakpoints ------------------------------------------------

    pub fn set_breakpoint(
        &mut self,
        source_path: &str,
        line: u32,
        condition: Option<String>,
    ) -> crate::breakpoints::SetBreakpointOutcome {
        let outcome = self.breakpoints.set_breakpoint(&self.resolver, &self.registry, source_path, line, condition);
        if outcome.verified {
            if let Err(e) = self.push_active_breakpoints() {
                self.breakpoints.mark_rejected(outcome.id, e.to_string());
            }
        }
        if let Some(bp) = self.breakpoints.get(outcome.id).cloned() {
            self.emit(Event::BreakpointChanged { breakpoint: bp });
        }
        outcome
    }

    pub fn remove_breakpoint(&mut self, id: i64) -> Result<(), BridgeError> {
        self.breakpoints.remove_breakpoint(id);
        self.push_active_breakpoints()
    }

    fn push_active_breakpoints(&self) -> Result<(), BridgeError> {
        let wire: Vec<WireDescriptor> = self.all_active_descriptors().iter().map(descriptor_to_wire).collect();
        match self.transport()?.request(DeviceOperation::SetBreakpoints(wire), QUERY_TIMEOUT)? {
            DeviceReply::BreakpointsSet { accepted: true } => Ok(()),
            _ => Err(BridgeError::ProtocolRejected("device rejected breakpoint list".to_string())),
        }
    }

    /// Verified user breakpoints plus the session-wide exception-catching
    /// descriptors installed at connect (spec.md lines 181-182) — the full
    /// list every `SetBreakpoints` push must carry to not silently drop
    /// one or the other.
    fn all_active_descriptors(&self) -> Vec<DeviceBreakpointDescriptor> {
        let mut all = self.breakpoints.active_descriptors();
        all.extend(self.exception_descriptors.iter().copied());
        all
    }

    // ---- C5: execution control ------------------------------------------

    pub fn continue_execution(&mut self) -> Result<(), BridgeError> {
        self.clear_handles();
        self.transport()?.request(DeviceOperation::Resume, QUERY_TIMEOUT)?;
        self.execution.mark_running();
        let transport = self.transport()?.clone();
        self.poller =
            Some(Poller::spawn(transport, self.poll_generation.clone(), self.raw_stop_tx.clone()));
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), BridgeError> {
        if let Some(poller) = self.poller.take() {
            drop(poller);
        }
        self.transport()?.request(DeviceOperation::Pause, QUERY_TIMEOUT)?;
        let threads = self.thread_list()?;
        let thread_id = threads.first().copied().unwrap_or(1);
        self.execution.set_last_thread_list(threads);
        self.execution.mark_stopped(thread_id);
        self.emit(Event::Stopped {
            reason: StopReason::Pause,
            thread_id,
            all_threads_stopped: true,
            hit_breakpoint_ids: None,
            text: None,
        });
        Ok(())
    }

    /// Non-blocking: returns `true` if the background poller had produced
    /// a result and it was processed into a public event.
    pub fn try_poll_stop(&mut self) -> Result<bool, BridgeError> {
        match self.raw_stop_rx.try_recv() {
            Ok(outcome) => {
                self.handle_poller_outcome(outcome)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn handle_poller_outcome(&mut self, outcome: PollerOutcome) -> Result<(), BridgeError> {
        self.poller = None;
        match outcome {
            PollerOutcome::Stopped(raw) => {
                let reason = self.classify_poller_stop(&raw);
                self.execution.mark_stopped(raw.thread_id);
                let hit_ids = match (&raw.breakpoint_status, reason) {
                    (Some(status), StopReason::Breakpoint) => Some(vec![status.id as i64]),
                    _ => None,
                };
                self.emit(Event::Stopped {
                    reason,
                    thread_id: raw.thread_id,
                    all_threads_stopped: true,
                    hit_breakpoint_ids: hit_ids,
                    text: None,
                });
                Ok(())
            }
            PollerOutcome::TransportLost(reason) => {
                tracing::warn!(%reason, "lost contact with device, attempting reboot recovery");
                self.recover_from_reboot()
            }
            PollerOutcome::Superseded => Ok(()),
        }
    }

    fn classify_poller_stop(&self, raw: &execution::RawStop) -> StopReason {
        match &raw.breakpoint_status {
            None => StopReason::Pause,
            Some(status) => {
                let flags = BreakpointFlags::from_bits_truncate(status.flags);
                if flags.intersects(
                    BreakpointFlags::EXCEPTION_THROWN
                        | BreakpointFlags::EXCEPTION_CAUGHT
                        | BreakpointFlags::EXCEPTION_UNCAUGHT,
                ) {
                    StopReason::Exception
                } else if status.id > 0 && self.breakpoint_matches_stop(status.id as i64, raw) {
                    StopReason::Breakpoint
                } else {
                    StopReason::Step
                }
            }
        }
    }

    /// A positive device id only classifies as `Breakpoint` if the stop's
    /// current location actually matches that descriptor's own
    /// `(method_index, ip)` (spec.md line 103) — a stale id from a prior
    /// plant landing at a different location is a `Step`, not a hit.
    fn breakpoint_matches_stop(&self, id: i64, raw: &execution::RawStop) -> bool {
        let Some(breakpoint) = self.breakpoints.get(id) else { return false };
        if !breakpoint.verified {
            return false;
        }
        let Some(descriptor) = breakpoint.device_descriptor else { return false };
        match (raw.stack_top_method_index, raw.stack_top_ip) {
            (Some(method_index), Some(ip)) => descriptor.matches_location(DeviceMethodIndex(method_index), ip),
            _ => false,
        }
    }

    /// Device-reboot recovery (spec.md §4.5): wait for the device, re-enable
    /// source-level debugging, re-query assemblies, re-apply breakpoints,
    /// and report a normal `stopped` event rather than a failure.
    fn recover_from_reboot(&mut self) -> Result<(), BridgeError> {
        let transport = self.transport()?.clone();
        execution::wait_for_device_ready(&transport)?;
        transport.request(
            DeviceOperation::SetExecutionMode {
                set_mask: clrbridge_transport::protocol::EXECUTION_MODE_SOURCE_LEVEL,
                clear_mask: 0,
            },
            QUERY_TIMEOUT,
        )?;
        self.refresh_assemblies()?;
        self.breakpoints.reapply_all_after_reboot(&self.resolver, &self.registry);
        self.push_active_breakpoints()?;

        self.execution.mark_stopped(1);
        self.emit(Event::Stopped {
            reason: StopReason::Step,
            thread_id: 1,
            all_threads_stopped: true,
            hit_breakpoint_ids: None,
            text: Some("Stopped after device reboot".to_string()),
        });
        Ok(())
    }

    fn thread_list(&self) -> Result<Vec<i64>, BridgeError> {
        match self.transport()?.request(DeviceOperation::GetThreadList, QUERY_TIMEOUT)? {
            DeviceReply::ThreadList(threads) => Ok(threads),
            _ => Ok(Vec::new()),
        }
    }

    pub fn threads(&self) -> Result<Vec<i64>, BridgeError> {
        self.thread_list()
    }

    // ---- C6: stepping -----------------------------------------------------

    fn current_frame(&self, thread_id: i64) -> Result<(DeviceMethodIndex, u32, u32), BridgeError> {
        match self.transport()?.request(DeviceOperation::GetThreadStack { thread_id }, QUERY_TIMEOUT)? {
            DeviceReply::ThreadStack { frames } => {
                let top = frames.first().ok_or(BridgeError::InvalidHandle)?;
                Ok((DeviceMethodIndex(top.method_index), top.ip, top.depth))
            }
            _ => Err(BridgeError::Transport("unexpected reply fetching thread stack".to_string())),
        }
    }

    fn step(&mut self, kind: StepKind) -> Result<StepOutcome, BridgeError> {
        self.clear_handles();
        let thread_id = self.execution.stopped_thread_id().unwrap_or(1);
        let (method_index, ip, depth) = self.current_frame(thread_id)?;
        let origin = StepOrigin { thread_id, method_index, ip, stack_depth: depth };

        let active: Vec<WireDescriptor> = self.all_active_descriptors().iter().map(descriptor_to_wire).collect();
        let next_target =
            if kind == StepKind::Over { self.next_line_step_target(method_index, ip, depth) } else { None };

        let breakpoints = &self.breakpoints;
        let is_user_hit =
            |idx: DeviceMethodIndex, at_ip: u32| breakpoints.find_user_breakpoint_at(idx, at_ip).is_some();

        let transport = self.transport()?.clone();
        let result = match kind {
            StepKind::Over => stepping::step_over(&transport, &active, origin, next_target, is_user_hit),
            StepKind::In => stepping::step_in(&transport, &active, origin, is_user_hit),
            StepKind::Out => stepping::step_out(&transport, &active, origin, is_user_hit),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(TransportError::Timeout) => return Err(BridgeError::from(TransportError::Timeout)),
            Err(e) => {
                tracing::warn!(%e, "lost contact with device mid-step, attempting reboot recovery");
                self.recover_from_reboot()?;
                return Ok(StepOutcome {
                    reason: StopReason::Step,
                    thread_id: self.execution.stopped_thread_id().unwrap_or(origin.thread_id),
                    method_index: origin.method_index,
                    ip: origin.ip,
                    warning: Some("device rebooted mid-step; recovered at the last known stop".to_string()),
                });
            }
        };

        self.execution.mark_stopped(outcome.thread_id);
        if let Some(warning) = &outcome.warning {
            tracing::warn!(%warning, "stepping engine degraded to a bounded fallback path");
        }
        self.emit(Event::Stopped {
            reason: outcome.reason,
            thread_id: outcome.thread_id,
            all_threads_stopped: true,
            hit_breakpoint_ids: None,
            text: outcome.warning.clone(),
        });
        Ok(outcome)
    }

    fn next_line_step_target(
        &self,
        method_index: DeviceMethodIndex,
        ip: u32,
        _depth: u32,
    ) -> Option<(DeviceMethodIndex, u32)> {
        for assembly_name in self.resolver.get_loaded_assemblies() {
            if let Some(loc) = self.resolver.get_source_location(assembly_name, method_index, ip) {
                if let Some(next) = self.resolver.get_next_line_breakpoint_location(
                    &loc.file,
                    loc.line,
                    Some(method_index),
                ) {
                    let assembly_idx = self
                        .registry
                        .get_assembly_index(&next.assembly_name)
                        .unwrap_or(AssemblyIndex(1));
                    let idx = DeviceMethodIndex::new(assembly_idx, (next.method_token.0 & 0xFFFF) as u16);
                    return Some((idx, next.il_offset));
                }
            }
        }
        None
    }

    pub fn step_over(&mut self) -> Result<StepOutcome, BridgeError> {
        self.step(StepKind::Over)
    }

    pub fn step_in(&mut self) -> Result<StepOutcome, BridgeError> {
        self.step(StepKind::In)
    }

    pub fn step_out(&mut self) -> Result<StepOutcome, BridgeError> {
        self.step(StepKind::Out)
    }

    // ---- C7: stack trace and variables -------------------------------------

    pub fn stack_trace(&mut self, thread_id: i64) -> Result<Vec<FrameHandle>, BridgeError> {
        let reply = self.transport()?.request(DeviceOperation::GetThreadStack { thread_id }, QUERY_TIMEOUT)?;
        let DeviceReply::ThreadStack { frames } = reply else {
            return Err(BridgeError::Transport("unexpected reply fetching thread stack".to_string()));
        };

        let mut handles = Vec::with_capacity(frames.len());
        for frame in frames {
            let handle = FrameHandle(self.alloc_handle());
            self.frames.insert(
                handle,
                FrameContext {
                    thread_id,
                    stack_depth: frame.depth,
                    method_index: DeviceMethodIndex(frame.method_index),
                    ip: frame.ip,
                },
            );
            handles.push(handle);
        }
        Ok(handles)
    }

    pub fn source_location_for_frame(&self, frame: FrameHandle) -> Option<(String, u32)> {
        let ctx = self.frames.get(&frame)?;
        for assembly_name in self.resolver.get_loaded_assemblies() {
            if let Some(loc) = self.resolver.get_source_location(assembly_name, ctx.method_index, ctx.ip) {
                return Some((loc.file, loc.line));
            }
        }
        None
    }

    pub fn get_scopes(&mut self, frame: FrameHandle) -> Result<Vec<ScopeHandle>, BridgeError> {
        let ctx = *self.frames.get(&frame).ok_or(BridgeError::InvalidHandle)?;
        let transport = self.transport()?.clone();
        let infos = variables::get_scopes(&transport, ctx.thread_id, ctx.stack_depth)?;

        let mut handles = Vec::with_capacity(infos.len());
        for info in infos {
            let handle = ScopeHandle(self.alloc_handle());
            self.scopes.insert(handle, ScopeContext { frame, kind: info.kind, count: info.count });
            handles.push(handle);
        }
        Ok(handles)
    }

    pub fn describe_scope(&self, scope: ScopeHandle) -> Option<ScopeInfo> {
        let ctx = self.scopes.get(&scope)?;
        let name = match ctx.kind {
            VariableScopeKind::Local => "Locals",
            VariableScopeKind::Argument => "Arguments",
        };
        Some(ScopeInfo { kind: ctx.kind, name, count: ctx.count })
    }

    pub fn get_variables(&mut self, scope: ScopeHandle) -> Result<Vec<VariableEntry>, BridgeError> {
        let scope_ctx = *self.scopes.get(&scope).ok_or(BridgeError::InvalidHandle)?;
        let frame_ctx = *self.frames.get(&scope_ctx.frame).ok_or(BridgeError::InvalidHandle)?;
        let transport = self.transport()?.clone();

        let local_names = self
            .resolver
            .get_loaded_assemblies()
            .iter()
            .find_map(|name| self.resolver.get_local_variable_names(name, frame_ctx.method_index))
            .unwrap_or_default();

        let named = variables::get_variables(
            &transport,
            frame_ctx.thread_id,
            frame_ctx.stack_depth,
            scope_ctx.kind,
            scope_ctx.count,
            &local_names,
        )?;

        Ok(named
            .into_iter()
            .map(|v| {
                let handle = self.register_value(&v.value);
                VariableEntry { name: v.name, value: v.value, handle }
            })
            .collect())
    }

    pub fn evaluate(&mut self, expression: &str, frame: FrameHandle) -> Result<EvaluatedValue, BridgeError> {
        let ctx = *self.frames.get(&frame).ok_or(BridgeError::InvalidHandle)?;
        let transport = self.transport()?.clone();

        let local_names = self
            .resolver
            .get_loaded_assemblies()
            .iter()
            .find_map(|name| self.resolver.get_local_variable_names(name, ctx.method_index))
            .unwrap_or_default();

        let static_fields = variables::scan_static_fields(&transport);
        let value = variables::evaluate(
            &transport,
            expression,
            ctx.thread_id,
            ctx.stack_depth,
            &local_names,
            &static_fields,
        )?;
        let handle = self.register_value(&value);
        Ok(EvaluatedValue { value, handle })
    }

    /// Expands a non-primitive value previously returned by
    /// [`Self::get_variables`] or [`Self::evaluate`]: arrays enumerate
    /// elements, objects enumerate fields (spec.md §4.7). Children get
    /// their own handle when they are themselves expandable.
    pub fn expand(&mut self, handle: ValueHandle) -> Result<Vec<ExpandedVariable>, BridgeError> {
        let value = self.values.get(&handle).cloned().ok_or(BridgeError::InvalidHandle)?;
        let transport = self.transport()?.clone();

        let field_offsets = if value.is_array {
            Vec::new()
        } else {
            self.field_cache.field_offsets(&transport, value.type_descriptor)
        };

        let fetch_transport = transport.clone();
        let entries = variables::expand_value(
            &transport,
            &mut self.field_cache,
            &value,
            |index| {
                fetch_transport
                    .request(DeviceOperation::GetStaticFieldValue { field_descriptor: index }, QUERY_TIMEOUT)
                    .map(|reply| match reply {
                        DeviceReply::RuntimeValue(wire) => variables::runtime_value_from_wire(wire),
                        _ => RuntimeValue {
                            data_type: "Unknown".to_string(),
                            type_descriptor: 0,
                            is_null: true,
                            is_primitive: true,
                            is_value_type: false,
                            is_array: false,
                            is_boxed: false,
                            payload: None,
                            field_count: 0,
                            array_length: 0,
                        },
                    })
            },
            &field_offsets,
        )?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let handle = self.register_value(&entry.value);
                ExpandedVariable { name: entry.name, value: entry.value, handle }
            })
            .collect())
    }

    /// Only a handle to a primitive, non-null value is writable
    /// (spec.md §4.7); the handle arena is the `scope_or_value_handle`
    /// addressing spec.md §4.7 describes, since every named variable and
    /// evaluation result is already allocated one.
    pub fn set_variable(&mut self, handle: ValueHandle, value_string: &str) -> Result<String, BridgeError> {
        let value = self.values.get(&handle).ok_or(BridgeError::InvalidHandle)?;
        variables::set_variable(value, value_string)
    }

    pub fn field_cache_mut(&mut self) -> &mut FieldNameCache {
        &mut self.field_cache
    }

    // ---- C8: deploy / reboot / terminate ------------------------------------

    pub fn deploy(&self, blobs: Vec<Vec<u8>>, reboot_after: bool, skip_erase: bool) -> Result<(), BridgeError> {
        let blobs = blobs.into_iter().map(|bytes| WireBlob { bytes }).collect();
        match self.transport()?.request(
            DeviceOperation::Deploy { blobs, reboot_after, skip_erase },
            CONNECT_TIMEOUT,
        )? {
            DeviceReply::Ok => Ok(()),
            _ => Err(BridgeError::ProtocolRejected("device rejected deploy".to_string())),
        }
    }

    pub fn reboot(&mut self) -> Result<(), BridgeError> {
        let option = if self.config.clr_only_reboot { RebootOption::ClrOnly } else { RebootOption::Full };
        self.transport()?.request(DeviceOperation::Reboot { option }, CONNECT_TIMEOUT)?;
        self.recover_from_reboot()
    }

    pub fn terminate(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_disconnected() {
        let (session, _events) = DebugSession::new(SessionConfig::default());
        assert_eq!(session.execution_state(), ExecutionState::Disconnected);
    }

    #[test]
    fn set_breakpoint_without_connection_is_pending_not_an_error() {
        let (mut session, _events) = DebugSession::new(SessionConfig::default());
        let outcome = session.set_breakpoint("Program.cs", 42, None);
        assert!(!outcome.verified);
    }
}
