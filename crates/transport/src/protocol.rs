// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Typed device operations (spec.md §4.1, §6 Southbound). The bit-exact
//! wire encoding is owned by the firmware and a matching codec (see
//! [`crate::codec`]); this module only fixes the shape every codec must be
//! able to carry.

use serde::{Deserialize, Serialize};

/// `Stopped` bit in the execution-mode bitmask (spec.md §6, fixed value).
pub const EXECUTION_MODE_STOPPED: u32 = 0x8000_0000;
/// `SourceLevelDebugging` bit in the execution-mode bitmask.
pub const EXECUTION_MODE_SOURCE_LEVEL: u32 = 0x0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebootOption {
    ClrOnly,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    Local,
    Argument,
}

/// Wire form of a breakpoint/step descriptor. Mirrors
/// [`clrbridge_core::DeviceBreakpointDescriptor`] but uses plain integers so
/// it can cross a codec boundary without pulling in `bitflags` semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireDescriptor {
    pub id: i32,
    pub flags: u32,
    pub thread_filter: i64,
    pub stack_depth: u32,
    pub method_index: u32,
    pub ip: u32,
    pub ip_start: u32,
    pub ip_end: u32,
}

/// `PID_ANY` thread filter value (spec.md §6).
pub const PID_ANY: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireBlob {
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceOperation {
    Connect,
    GetExecutionMode,
    Pause,
    Resume,
    SetBreakpoints(Vec<WireDescriptor>),
    GetBreakpointStatus,
    GetThreadList,
    GetThreadStack { thread_id: i64 },
    GetStackFrameInfo { thread_id: i64, depth: u32 },
    GetStackFrameValue { thread_id: i64, depth: u32, kind: VariableKind, index: u32 },
    GetStaticFieldValue { field_descriptor: u32 },
    ResolveType { type_descriptor: u32 },
    ResolveField { field_descriptor: u32 },
    ResolveAllAssemblies,
    UpdateDebugFlags { flags: u32 },
    SetExecutionMode { set_mask: u32, clear_mask: u32 },
    Reboot { option: RebootOption },
    Deploy { blobs: Vec<WireBlob>, reboot_after: bool, skip_erase: bool },
    GetMethodName { method_descriptor: u32, fully_qualified: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRuntimeValue {
    pub data_type: String,
    pub type_descriptor: u32,
    pub is_null: bool,
    pub is_primitive: bool,
    pub is_value_type: bool,
    pub is_array: bool,
    pub is_boxed: bool,
    pub payload: Option<String>,
    pub field_count: u32,
    pub array_length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireBreakpointStatus {
    pub id: i16,
    pub flags: u32,
    pub method_index: u32,
    pub ip: u32,
    pub stack_depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireStackFrameInfo {
    pub n_args: u32,
    pub n_locals: u32,
    pub eval_depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFieldInfo {
    pub declaring_type: u32,
    pub offset: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAssemblyInfo {
    pub index: u32,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceReply {
    Ok,
    ExecutionMode { mask: u32 },
    BreakpointsSet { accepted: bool },
    BreakpointStatus(Option<WireBreakpointStatus>),
    ThreadList(Vec<i64>),
    ThreadStack { frames: Vec<StackFrameEntry> },
    StackFrameInfo(WireStackFrameInfo),
    RuntimeValue(WireRuntimeValue),
    Field(WireFieldInfo),
    Assemblies(Vec<WireAssemblyInfo>),
    MethodName(String),
    Rejected { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrameEntry {
    pub method_index: u32,
    pub ip: u32,
    pub depth: u32,
}

/// Unsolicited events the device may push outside a request/reply cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceEvent {
    Message(String),
}
