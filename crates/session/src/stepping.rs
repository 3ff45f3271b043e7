// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Stepping Engine (C6): source-level step-over/in/out built on the
//! device's IL-level step primitive (spec.md §4.6).

use clrbridge_core::{reserved_ids, BreakpointFlags, DeviceMethodIndex, StopReason};
use clrbridge_transport::protocol::{DeviceOperation, DeviceReply, StackFrameEntry, WireDescriptor};
use clrbridge_transport::{TransportError, WireTransport, STEP_WAIT_TIMEOUT};

/// Bounded safety cap on the IL-stepping fallback loop (spec.md §4.6).
const IL_STEP_ITERATION_CAP: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Over,
    In,
    Out,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub reason: StopReason,
    pub thread_id: i64,
    pub method_index: DeviceMethodIndex,
    pub ip: u32,
    pub warning: Option<String>,
}

/// The point the step started from, captured so a stop can be compared
/// against it (spec.md §4.6 "classification rule").
#[derive(Debug, Clone, Copy)]
pub struct StepOrigin {
    pub thread_id: i64,
    pub method_index: DeviceMethodIndex,
    pub ip: u32,
    pub stack_depth: u32,
}

/// Applies the universal stop-classification rule: a stop is `breakpoint`
/// iff an active user descriptor's `(method_index, ip)` matches the
/// current location *and* the IP has moved since the step began. This
/// keeps a step that lands back on its own starting instruction from being
/// misreported as a breakpoint hit (spec.md §4.6).
pub fn classify_step_stop(
    origin: StepOrigin,
    current_method_index: DeviceMethodIndex,
    current_ip: u32,
    user_descriptor_here: bool,
) -> StopReason {
    let moved = current_method_index != origin.method_index || current_ip != origin.ip;
    if user_descriptor_here && moved {
        StopReason::Breakpoint
    } else {
        StopReason::Step
    }
}

fn plant(id: i32, flags: BreakpointFlags, method_index: DeviceMethodIndex, ip: u32) -> WireDescriptor {
    WireDescriptor {
        id,
        flags: flags.bits(),
        thread_filter: clrbridge_transport::protocol::PID_ANY,
        stack_depth: 0,
        method_index: method_index.0,
        ip,
        ip_start: 0,
        ip_end: 0,
    }
}

/// Pushes a temporary descriptor list, leaving the caller's prior list
/// (the verified breakpoints) untouched on disk — the caller is
/// responsible for restoring it with a follow-up `SetBreakpoints` once the
/// step concludes (spec.md §4.6 step 5).
fn push_temporary_descriptors(
    transport: &WireTransport,
    active: &[WireDescriptor],
    temporary: Vec<WireDescriptor>,
) -> Result<(), TransportError> {
    let mut all = active.to_vec();
    all.extend(temporary);
    match transport.request(DeviceOperation::SetBreakpoints(all), STEP_WAIT_TIMEOUT)? {
        DeviceReply::BreakpointsSet { accepted: true } => Ok(()),
        DeviceReply::BreakpointsSet { accepted: false } => {
            Err(TransportError::Rejected("device rejected step descriptors".to_string()))
        }
        _ => Err(TransportError::Rejected("unexpected reply planting step descriptors".to_string())),
    }
}

fn restore_descriptors(transport: &WireTransport, active: &[WireDescriptor]) -> Result<(), TransportError> {
    match transport.request(DeviceOperation::SetBreakpoints(active.to_vec()), STEP_WAIT_TIMEOUT)? {
        DeviceReply::BreakpointsSet { accepted: true } => Ok(()),
        _ => Err(TransportError::Rejected("device rejected descriptor restore".to_string())),
    }
}

fn resume_and_wait(transport: &WireTransport) -> Result<(i64, StackFrameEntry), TransportError> {
    transport.request(DeviceOperation::Resume, STEP_WAIT_TIMEOUT)?;

    let deadline = std::time::Instant::now() + STEP_WAIT_TIMEOUT;
    loop {
        if std::time::Instant::now() >= deadline {
            let _ = transport.request(DeviceOperation::Pause, STEP_WAIT_TIMEOUT);
            return Err(TransportError::Timeout);
        }
        match transport.request(DeviceOperation::GetExecutionMode, STEP_WAIT_TIMEOUT)? {
            DeviceReply::ExecutionMode { mask } if mask & clrbridge_transport::protocol::EXECUTION_MODE_STOPPED != 0 => {
                let threads = match transport.request(DeviceOperation::GetThreadList, STEP_WAIT_TIMEOUT)? {
                    DeviceReply::ThreadList(t) => t,
                    _ => Vec::new(),
                };
                let thread_id = threads.first().copied().unwrap_or(1);
                let frame = match transport.request(DeviceOperation::GetThreadStack { thread_id }, STEP_WAIT_TIMEOUT)? {
                    DeviceReply::ThreadStack { frames } => frames.into_iter().next(),
                    _ => None,
                };
                let Some(frame) = frame else {
                    return Err(TransportError::Framing("stopped with no stack frame".to_string()));
                };
                return Ok((thread_id, frame));
            }
            _ => std::thread::sleep(std::time::Duration::from_millis(20)),
        }
    }
}

/// Step-over, breakpoint-planted fast path (spec.md §4.6). `next_target`
/// is `Some((method_index, il_offset))` when the Symbol Resolver found the
/// next source line in the same file; `None` falls back to IL stepping.
pub fn step_over(
    transport: &WireTransport,
    active: &[WireDescriptor],
    origin: StepOrigin,
    next_target: Option<(DeviceMethodIndex, u32)>,
    is_active_user_location: impl Fn(DeviceMethodIndex, u32) -> bool,
) -> Result<StepOutcome, TransportError> {
    match next_target {
        Some((method_index, il_offset)) => {
            let primary = plant(
                reserved_ids::STEP_PLANT_PRIMARY,
                BreakpointFlags::HARD,
                method_index,
                il_offset,
            );
            let step_out = plant(
                reserved_ids::STEP_PLANT_RETURN,
                BreakpointFlags::STEP_OUT
                    | BreakpointFlags::EXCEPTION_CAUGHT
                    | BreakpointFlags::THREAD_TERMINATED,
                origin.method_index,
                origin.ip,
            );
            push_temporary_descriptors(transport, active, vec![primary, step_out])?;

            let result = resume_and_wait(transport);
            restore_descriptors(transport, active)?;
            let (thread_id, frame) = result?;

            let current_index = DeviceMethodIndex(frame.method_index);
            let user_hit = is_active_user_location(current_index, frame.ip);
            let reason = classify_step_stop(origin, current_index, frame.ip, user_hit);
            Ok(StepOutcome { reason, thread_id, method_index: current_index, ip: frame.ip, warning: None })
        }
        None => step_over_il_fallback(transport, active, origin, is_active_user_location),
    }
}

/// IL-stepping fallback: bounded loop of device IL step-overs, comparing
/// `(method, ip, stack_depth)` against the origin after each step
/// (spec.md §4.6).
fn step_over_il_fallback(
    transport: &WireTransport,
    active: &[WireDescriptor],
    origin: StepOrigin,
    is_active_user_location: impl Fn(DeviceMethodIndex, u32) -> bool,
) -> Result<StepOutcome, TransportError> {
    let marker = plant(
        reserved_ids::STEP_MARKER,
        BreakpointFlags::STEP_OVER,
        origin.method_index,
        origin.ip,
    );

    for iteration in 0..IL_STEP_ITERATION_CAP {
        push_temporary_descriptors(transport, active, vec![marker.clone()])?;
        let result = resume_and_wait(transport);
        restore_descriptors(transport, active)?;
        let (thread_id, frame) = result?;

        let current_index = DeviceMethodIndex(frame.method_index);
        let user_hit = is_active_user_location(current_index, frame.ip);
        if user_hit && (current_index != origin.method_index || frame.ip != origin.ip) {
            return Ok(StepOutcome {
                reason: StopReason::Breakpoint,
                thread_id,
                method_index: current_index,
                ip: frame.ip,
                warning: None,
            });
        }
        if current_index != origin.method_index
            || frame.depth != origin.stack_depth
            || frame.ip != origin.ip
        {
            return Ok(StepOutcome {
                reason: StopReason::Step,
                thread_id,
                method_index: current_index,
                ip: frame.ip,
                warning: None,
            });
        }
        let _ = iteration;
    }

    Ok(StepOutcome {
        reason: StopReason::Step,
        thread_id: origin.thread_id,
        method_index: origin.method_index,
        ip: origin.ip,
        warning: Some(format!("IL-stepping fallback hit its {IL_STEP_ITERATION_CAP}-iteration cap")),
    })
}

pub fn step_in(
    transport: &WireTransport,
    active: &[WireDescriptor],
    origin: StepOrigin,
    is_active_user_location: impl Fn(DeviceMethodIndex, u32) -> bool,
) -> Result<StepOutcome, TransportError> {
    step_plant_single(
        transport,
        active,
        origin,
        BreakpointFlags::STEP_IN,
        is_active_user_location,
    )
}

pub fn step_out(
    transport: &WireTransport,
    active: &[WireDescriptor],
    origin: StepOrigin,
    is_active_user_location: impl Fn(DeviceMethodIndex, u32) -> bool,
) -> Result<StepOutcome, TransportError> {
    step_plant_single(
        transport,
        active,
        origin,
        BreakpointFlags::STEP_OUT,
        is_active_user_location,
    )
}

fn step_plant_single(
    transport: &WireTransport,
    active: &[WireDescriptor],
    origin: StepOrigin,
    flags: BreakpointFlags,
    is_active_user_location: impl Fn(DeviceMethodIndex, u32) -> bool,
) -> Result<StepOutcome, TransportError> {
    let descriptor = plant(reserved_ids::STEP_MARKER, flags, origin.method_index, origin.ip);
    push_temporary_descriptors(transport, active, vec![descriptor])?;
    let result = resume_and_wait(transport);
    restore_descriptors(transport, active)?;
    let (thread_id, frame) = result?;

    let current_index = DeviceMethodIndex(frame.method_index);
    let user_hit = is_active_user_location(current_index, frame.ip);
    let reason = classify_step_stop(origin, current_index, frame.ip, user_hit);
    Ok(StepOutcome { reason, thread_id, method_index: current_index, ip: frame.ip, warning: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clrbridge_core::AssemblyIndex;

    fn origin() -> StepOrigin {
        StepOrigin {
            thread_id: 1,
            method_index: DeviceMethodIndex::new(AssemblyIndex(1), 3),
            ip: 0x10,
            stack_depth: 0,
        }
    }

    #[test]
    fn classify_reports_step_when_ip_unchanged() {
        let o = origin();
        let reason = classify_step_stop(o, o.method_index, o.ip, true);
        assert_eq!(reason, StopReason::Step);
    }

    #[test]
    fn classify_reports_breakpoint_only_when_ip_moved_and_user_descriptor_present() {
        let o = origin();
        let reason = classify_step_stop(o, o.method_index, 0x20, true);
        assert_eq!(reason, StopReason::Breakpoint);

        let reason_no_user = classify_step_stop(o, o.method_index, 0x20, false);
        assert_eq!(reason_no_user, StopReason::Step);
    }
}
