// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Shared data model for the debug bridge: method/assembly addressing,
//! breakpoint descriptors, runtime values, and the error/event types every
//! other crate in the workspace converts into.

use bitflags::bitflags;
use std::collections::HashMap;
use std::fmt;

pub mod error;
pub mod event;

pub use error::BridgeError;
pub use event::{Event, OutputCategory, StopReason};

/// The device's name for an assembly: a 32-bit opaque value whose high 16
/// bits the device itself treats as an identifying index. Round-tripped
/// without modification; this crate never interprets the bit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyIndex(pub u32);

impl fmt::Display for AssemblyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A method identifier as it appears inside a symbol file. Distinct from
/// [`DeviceMethodIndex`]: the two namespaces must never be mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolMethodToken(pub u32);

/// The device's name for a method: `(assembly_index << 16) | method_row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceMethodIndex(pub u32);

impl DeviceMethodIndex {
    pub fn new(assembly: AssemblyIndex, method_row: u16) -> Self {
        DeviceMethodIndex((assembly.0 << 16) | method_row as u32)
    }

    pub fn assembly_index(self) -> AssemblyIndex {
        AssemblyIndex(self.0 >> 16)
    }

    pub fn method_row(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for DeviceMethodIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// One method's IL-offset-to-source-line map, local variable names, and
/// owning source file. Immutable once loaded (spec for the symbol tables).
#[derive(Debug, Clone)]
pub struct SymbolMethod {
    pub token: SymbolMethodToken,
    pub source_file: String,
    /// `(il_offset, line)` pairs, non-decreasing in `line` as IL offset
    /// increases. Not required to cover every offset in the method.
    pub il_to_line: Vec<(u32, u32)>,
    /// Positional local variable names; index = device slot index.
    pub locals: Vec<String>,
    /// Whether the symbol file flagged this method as the program entry
    /// point (spec.md `get_entry_point_location`).
    pub is_entry_point: bool,
}

impl SymbolMethod {
    /// Largest IL offset at or below `ip`, with the line it maps to.
    pub fn line_at(&self, ip: u32) -> Option<(u32, u32)> {
        self.il_to_line
            .iter()
            .filter(|(offset, _)| *offset <= ip)
            .max_by_key(|(offset, _)| *offset)
            .copied()
    }

    /// Every IL offset that begins a source line different from the one at
    /// `current_ip` (spec.md `get_all_step_targets`).
    pub fn step_targets_from(&self, current_ip: u32) -> Vec<(u32, u32)> {
        let current_line = self.line_at(current_ip).map(|(_, line)| line);
        self.il_to_line
            .iter()
            .filter(|(_, line)| Some(*line) != current_line)
            .copied()
            .collect()
    }

    /// First IL offset strictly after `current_line` in IL order.
    pub fn next_line_after(&self, current_line: u32) -> Option<(u32, u32)> {
        self.il_to_line
            .iter()
            .filter(|(_, line)| *line > current_line)
            .min_by_key(|(_, line)| *line)
            .copied()
    }
}

/// All methods of one assembly, plus a reverse file -> line index.
/// Immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct SymbolAssembly {
    pub name: String,
    pub methods: HashMap<SymbolMethodToken, SymbolMethod>,
    /// `file -> sorted (line, token, il_offset)`, built once at load time.
    file_index: HashMap<String, Vec<(u32, SymbolMethodToken, u32)>>,
    /// Device method row (low 16 bits of a `DeviceMethodIndex`) -> token.
    /// Bridges the two token namespaces (see the GLOSSARY entries for
    /// "Method index" vs. "Method token").
    by_row: HashMap<u16, SymbolMethodToken>,
}

impl SymbolAssembly {
    pub fn new(name: impl Into<String>, methods: Vec<SymbolMethod>) -> Self {
        let mut file_index: HashMap<String, Vec<(u32, SymbolMethodToken, u32)>> = HashMap::new();
        for method in &methods {
            for (offset, line) in &method.il_to_line {
                file_index
                    .entry(method.source_file.clone())
                    .or_default()
                    .push((*line, method.token, *offset));
            }
        }
        for rows in file_index.values_mut() {
            rows.sort_by_key(|(line, _, offset)| (*line, *offset));
        }
        let by_row = methods
            .iter()
            .map(|m| ((m.token.0 & 0xFFFF) as u16, m.token))
            .collect();
        let methods = methods.into_iter().map(|m| (m.token, m)).collect();
        SymbolAssembly {
            name: name.into(),
            methods,
            file_index,
            by_row,
        }
    }

    pub fn lines_in_file(&self, file: &str) -> Option<&[(u32, SymbolMethodToken, u32)]> {
        self.file_index.get(file).map(Vec::as_slice)
    }

    /// Looks a method up by the low 16 bits of a `DeviceMethodIndex`
    /// (spec.md `get_source_location`: "extract the method row from the
    /// low 16 bits").
    pub fn method_by_row(&self, row: u16) -> Option<&SymbolMethod> {
        self.by_row.get(&row).and_then(|token| self.methods.get(token))
    }
}

bitflags! {
    /// Breakpoint-descriptor flags, OR-able per spec.md §6 Southbound.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BreakpointFlags: u32 {
        const STEP_IN = 0x0001;
        const STEP_OVER = 0x0002;
        const STEP_OUT = 0x0004;
        const HARD = 0x0008;
        const EXCEPTION_THROWN = 0x0010;
        const EXCEPTION_CAUGHT = 0x0020;
        const EXCEPTION_UNCAUGHT = 0x0040;
        const THREAD_TERMINATED = 0x0080;
        const THREAD_CREATED = 0x0100;
        /// Any of the three step kinds.
        const STEP = Self::STEP_IN.bits() | Self::STEP_OVER.bits() | Self::STEP_OUT.bits();
    }
}

/// Depth qualifier carried alongside `STEP_*` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDepth {
    Normal,
    Call,
    Return,
}

/// Thread filter for a descriptor; `Any` is the wire's `PID_ANY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadFilter {
    Any,
    Thread(i64),
}

/// Reserved negative breakpoint ids (spec.md §3). Positive ids are user
/// breakpoints and must be unique.
pub mod reserved_ids {
    pub const STEP_MARKER: i32 = -1;
    pub const ENTRY_POINT: i32 = -2;
    pub const EXCEPTION_ALL: i32 = -3;
    pub const EXCEPTION_UNCAUGHT: i32 = -4;
    pub const STEP_PLANT_PRIMARY: i32 = -100;
    pub const STEP_PLANT_RETURN: i32 = -101;
}

/// The device-facing shape of one breakpoint/step descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBreakpointDescriptor {
    pub id: i32,
    pub flags: BreakpointFlags,
    pub thread_filter: ThreadFilter,
    pub stack_depth: u32,
    pub method_index: DeviceMethodIndex,
    pub ip: u32,
    pub ip_start: u32,
    pub ip_end: u32,
}

impl DeviceBreakpointDescriptor {
    pub fn matches_location(&self, method_index: DeviceMethodIndex, ip: u32) -> bool {
        self.method_index == method_index && self.ip == ip
    }
}

/// A user-visible breakpoint. `verified` implies `device_descriptor.is_some()`.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub id: i64,
    pub source_path: String,
    pub line: u32,
    pub verified: bool,
    pub message: Option<String>,
    pub condition: Option<String>,
    pub device_descriptor: Option<DeviceBreakpointDescriptor>,
}

/// Session-scoped handle into the stack-trace arena, cleared on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u64);

/// Session-scoped handle referencing a `(frame, kind, count)` scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeHandle(pub u64);

/// Session-scoped handle referencing a runtime value awaiting expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScopeKind {
    Local,
    Argument,
}

/// Opaque decoded view of a device value.
#[derive(Debug, Clone)]
pub struct RuntimeValue {
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

impl RuntimeValue {
    pub fn display(&self) -> String {
        if self.is_null {
            return "null".to_string();
        }
        self.payload.clone().unwrap_or_else(|| self.data_type.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_method_index_round_trips_assembly_and_row() {
        let idx = DeviceMethodIndex::new(AssemblyIndex(7), 42);
        assert_eq!(idx.assembly_index(), AssemblyIndex(7));
        assert_eq!(idx.method_row(), 42);
    }

    #[test]
    fn line_at_picks_largest_offset_not_exceeding_ip() {
        let method = SymbolMethod {
            token: SymbolMethodToken(1),
            source_file: "Program.cs".into(),
            il_to_line: vec![(0x00, 10), (0x10, 11), (0x20, 10)],
            locals: vec![],
            is_entry_point: false,
        };
        assert_eq!(method.line_at(0x15), Some((0x10, 11)));
        assert_eq!(method.line_at(0x25), Some((0x20, 10)));
        assert_eq!(method.line_at(0x0), Some((0x00, 10)));
    }

    #[test]
    fn symbol_assembly_file_index_is_sorted_by_line() {
        let method = SymbolMethod {
            token: SymbolMethodToken(3),
            source_file: "Program.cs".into(),
            il_to_line: vec![(0x20, 12), (0x00, 10), (0x10, 11)],
            locals: vec![],
            is_entry_point: false,
        };
        let assembly = SymbolAssembly::new("App", vec![method]);
        let rows = assembly.lines_in_file("Program.cs").unwrap();
        let lines: Vec<u32> = rows.iter().map(|(line, _, _)| *line).collect();
        assert_eq!(lines, vec![10, 11, 12]);
    }
}
