// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Variable Inspector (C7): frame scopes, local/argument decoding, and
//! object/array expansion (spec.md §4.7).

use clrbridge_core::{BridgeError, RuntimeValue, VariableScopeKind};
use clrbridge_transport::protocol::{DeviceOperation, DeviceReply, VariableKind, WireFieldInfo};
use clrbridge_transport::{TransportError, WireTransport, QUERY_TIMEOUT};
use std::collections::HashMap;

/// Slots whose Symbol-Resolver name matches this pattern are compiler
/// generated and hidden, never blanked, from `get_variables` (spec.md
/// §4.7). Matches `local` followed by one or more ASCII digits, anchored
/// on both ends.
fn is_compiler_generated(name: &str) -> bool {
    let Some(digits) = name.strip_prefix("local") else { return false };
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Elements beyond this count are summarized in a trailing pseudo-entry
/// rather than enumerated (spec.md §4.7).
const MAX_ARRAY_ELEMENTS: u32 = 100;

#[derive(Debug, Clone)]
pub struct ScopeInfo {
    pub kind: VariableScopeKind,
    pub name: &'static str,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct NamedVariable {
    pub name: String,
    pub value: RuntimeValue,
    pub expandable: bool,
}

/// Caches, per (owning) type descriptor, the field table discovered by
/// probing `resolve_field` ascending indices until consecutive misses
/// indicate the end of the flat descriptor space (spec.md §9 "Field-name
/// discovery"). Persists for the life of the session.
#[derive(Default)]
pub struct FieldNameCache {
    by_type: HashMap<u32, HashMap<u32, String>>,
    global: HashMap<(u32, u32), String>,
}

/// How many consecutive `resolve_field` misses end a probe, and how many
/// extra system-assembly field descriptors to scan for inherited fields
/// missing from a type's own table (spec.md §4.7 "bounded scan").
const PROBE_MISS_LIMIT: u32 = 8;
const INHERITED_FIELD_SCAN_LIMIT: u32 = 64;

impl FieldNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every field offset discovered for `type_descriptor`,
    /// probing the device the first time a type is seen (spec.md §4.7
    /// expansion). Ordering is probe order, not declaration order.
    pub fn field_offsets(&mut self, transport: &WireTransport, type_descriptor: u32) -> Vec<u32> {
        self.ensure_type_loaded(transport, type_descriptor, 0);
        self.by_type.get(&type_descriptor).map(|t| t.keys().copied().collect()).unwrap_or_default()
    }

    fn ensure_type_loaded(&mut self, transport: &WireTransport, type_descriptor: u32, first_field_descriptor: u32) {
        if self.by_type.contains_key(&type_descriptor) {
            return;
        }
        let mut table = HashMap::new();
        let mut misses = 0;
        let mut fd = first_field_descriptor;
        while misses < PROBE_MISS_LIMIT {
            match transport.request(DeviceOperation::ResolveField { field_descriptor: fd }, QUERY_TIMEOUT) {
                Ok(DeviceReply::Field(info)) if info.declaring_type == type_descriptor => {
                    self.global.insert((type_descriptor, info.offset), info.name.clone());
                    table.insert(info.offset, info.name);
                    misses = 0;
                }
                Ok(DeviceReply::Field(_)) | Ok(_) => misses += 1,
                Err(_) => misses += 1,
            }
            fd += 1;
        }
        self.by_type.insert(type_descriptor, table);
    }

    /// Looks a field up by offset, falling back to a bounded scan of
    /// system-assembly field descriptors for inherited fields the type's
    /// own probe never reached.
    fn resolve(
        &mut self,
        transport: &WireTransport,
        type_descriptor: u32,
        offset: u32,
        first_field_descriptor: u32,
    ) -> Option<String> {
        self.ensure_type_loaded(transport, type_descriptor, first_field_descriptor);
        if let Some(name) = self.by_type.get(&type_descriptor).and_then(|t| t.get(&offset)) {
            return Some(name.clone());
        }
        for fd in 0..INHERITED_FIELD_SCAN_LIMIT {
            if let Ok(DeviceReply::Field(info)) =
                transport.request(DeviceOperation::ResolveField { field_descriptor: fd }, QUERY_TIMEOUT)
            {
                if info.offset == offset {
                    self.global.insert((type_descriptor, offset), info.name.clone());
                    return Some(info.name);
                }
            }
        }
        None
    }
}

pub(crate) fn runtime_value_from_wire(wire: clrbridge_transport::protocol::WireRuntimeValue) -> RuntimeValue {
    RuntimeValue {
        data_type: wire.data_type,
        type_descriptor: wire.type_descriptor,
        is_null: wire.is_null,
        is_primitive: wire.is_primitive,
        is_value_type: wire.is_value_type,
        is_array: wire.is_array,
        is_boxed: wire.is_boxed,
        payload: wire.payload,
        field_count: wire.field_count,
        array_length: wire.array_length,
    }
}

/// `get_scopes(frame)`: discovers `(n_args, n_locals)` via
/// `get_stack_frame_info` and emits "Locals" (always) and "Arguments"
/// (only if non-empty) (spec.md §4.7).
pub fn get_scopes(transport: &WireTransport, thread_id: i64, depth: u32) -> Result<Vec<ScopeInfo>, BridgeError> {
    let reply = transport.request(DeviceOperation::GetStackFrameInfo { thread_id, depth }, QUERY_TIMEOUT)?;
    let DeviceReply::StackFrameInfo(info) = reply else {
        return Err(BridgeError::Transport("unexpected reply resolving stack frame info".to_string()));
    };

    let mut scopes = vec![ScopeInfo { kind: VariableScopeKind::Local, name: "Locals", count: info.n_locals }];
    if info.n_args > 0 {
        scopes.push(ScopeInfo { kind: VariableScopeKind::Argument, name: "Arguments", count: info.n_args });
    }
    Ok(scopes)
}

/// `get_variables(handle)`: fetches each slot in a scope, names it from
/// the local-variable table by positional index, and filters
/// compiler-generated locals (spec.md §4.7).
pub fn get_variables(
    transport: &WireTransport,
    thread_id: i64,
    depth: u32,
    kind: VariableScopeKind,
    count: u32,
    local_names: &[String],
) -> Result<Vec<NamedVariable>, BridgeError> {
    let wire_kind = match kind {
        VariableScopeKind::Local => VariableKind::Local,
        VariableScopeKind::Argument => VariableKind::Argument,
    };

    let mut variables = Vec::new();
    for index in 0..count {
        let reply = transport.request(
            DeviceOperation::GetStackFrameValue { thread_id, depth, kind: wire_kind, index },
            QUERY_TIMEOUT,
        )?;
        let DeviceReply::RuntimeValue(wire) = reply else {
            continue;
        };

        let name = match kind {
            VariableScopeKind::Local => local_names
                .get(index as usize)
                .cloned()
                .unwrap_or_else(|| format!("local{index}")),
            VariableScopeKind::Argument => local_names
                .get(index as usize)
                .cloned()
                .unwrap_or_else(|| format!("arg{index}")),
        };

        if kind == VariableScopeKind::Local && is_compiler_generated(&name) {
            continue;
        }

        let value = runtime_value_from_wire(wire);
        let expandable = !value.is_primitive && !value.is_null;
        variables.push(NamedVariable { name, value, expandable });
    }
    Ok(variables)
}

#[derive(Debug, Clone)]
pub struct ExpandedEntry {
    pub name: String,
    pub value: RuntimeValue,
}

/// Expands a non-primitive value: arrays enumerate up to
/// `MAX_ARRAY_ELEMENTS` with a trailing truncation marker; objects use the
/// field-name cache keyed by `(type_descriptor, offset)` (spec.md §4.7).
pub fn expand_value(
    transport: &WireTransport,
    cache: &mut FieldNameCache,
    value: &RuntimeValue,
    array_element_fetch: impl Fn(u32) -> Result<RuntimeValue, TransportError>,
    field_offsets: &[u32],
) -> Result<Vec<ExpandedEntry>, BridgeError> {
    if value.is_array {
        let shown = value.array_length.min(MAX_ARRAY_ELEMENTS);
        let mut entries = Vec::new();
        for i in 0..shown {
            let element = array_element_fetch(i)?;
            entries.push(ExpandedEntry { name: format!("[{i}]"), value: element });
        }
        if value.array_length > MAX_ARRAY_ELEMENTS {
            let remaining = value.array_length - MAX_ARRAY_ELEMENTS;
            entries.push(ExpandedEntry {
                name: format!("[{remaining} more]"),
                value: RuntimeValue {
                    data_type: "...".to_string(),
                    type_descriptor: 0,
                    is_null: false,
                    is_primitive: true,
                    is_value_type: false,
                    is_array: false,
                    is_boxed: false,
                    payload: Some(format!("{remaining} more elements")),
                    field_count: 0,
                    array_length: 0,
                },
            });
        }
        return Ok(entries);
    }

    let mut entries = Vec::new();
    for &offset in field_offsets {
        let name = cache
            .resolve(transport, value.type_descriptor, offset, 0)
            .unwrap_or_else(|| format!("field_{offset:#x}"));
        let reply = transport.request(
            DeviceOperation::GetStaticFieldValue { field_descriptor: offset },
            QUERY_TIMEOUT,
        )?;
        if let DeviceReply::RuntimeValue(wire) = reply {
            entries.push(ExpandedEntry { name, value: runtime_value_from_wire(wire) });
        }
    }
    Ok(entries)
}

/// Scans the flat field-descriptor space for every field the device will
/// resolve, for `evaluate`'s static-field fallback (spec.md §4.7 step 3,
/// "scan field descriptors in the frame's assembly"). Bounded by the same
/// probe limit as the inherited-field scan.
pub fn scan_static_fields(transport: &WireTransport) -> Vec<WireFieldInfo> {
    let mut fields = Vec::new();
    for fd in 0..INHERITED_FIELD_SCAN_LIMIT {
        if let Ok(DeviceReply::Field(info)) =
            transport.request(DeviceOperation::ResolveField { field_descriptor: fd }, QUERY_TIMEOUT)
        {
            fields.push(info);
        }
    }
    fields
}

/// `evaluate(expression, frame)`: restricted to a single identifier,
/// resolved in order: locals, arguments, static fields (spec.md §4.7).
pub fn evaluate(
    transport: &WireTransport,
    expression: &str,
    thread_id: i64,
    depth: u32,
    local_names: &[String],
    static_fields: &[WireFieldInfo],
) -> Result<RuntimeValue, BridgeError> {
    if expression.is_empty() || !expression.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(BridgeError::cannot_evaluate(expression));
    }

    if let Some(index) = local_names.iter().position(|n| n == expression) {
        let reply = transport.request(
            DeviceOperation::GetStackFrameValue {
                thread_id,
                depth,
                kind: VariableKind::Local,
                index: index as u32,
            },
            QUERY_TIMEOUT,
        )?;
        if let DeviceReply::RuntimeValue(wire) = reply {
            return Ok(runtime_value_from_wire(wire));
        }
    }

    if let Some(arg_index) = expression.strip_prefix("arg").and_then(|s| s.parse::<u32>().ok()) {
        let reply = transport.request(
            DeviceOperation::GetStackFrameValue {
                thread_id,
                depth,
                kind: VariableKind::Argument,
                index: arg_index,
            },
            QUERY_TIMEOUT,
        )?;
        if let DeviceReply::RuntimeValue(wire) = reply {
            return Ok(runtime_value_from_wire(wire));
        }
    }

    for field in static_fields {
        let trailing = field.name.rsplit("::").next().unwrap_or(&field.name);
        if trailing == expression {
            let reply = transport.request(
                DeviceOperation::GetStaticFieldValue { field_descriptor: field.offset },
                QUERY_TIMEOUT,
            )?;
            if let DeviceReply::RuntimeValue(wire) = reply {
                return Ok(runtime_value_from_wire(wire));
            }
        }
    }

    Err(BridgeError::cannot_evaluate(expression))
}

/// `set_variable`: only primitive targets are writable. Parses
/// `value_string` against the target's data type and returns the new
/// display form on success (spec.md §4.7).
pub fn set_variable(value: &RuntimeValue, value_string: &str) -> Result<String, BridgeError> {
    if value.is_null || !value.is_primitive {
        return Err(BridgeError::UnsupportedEvaluation(format!(
            "cannot set a value of type '{}': not a primitive",
            value.data_type
        )));
    }

    match value.data_type.as_str() {
        "Boolean" => match value_string {
            "true" | "1" => Ok("True".to_string()),
            "false" | "0" => Ok("False".to_string()),
            other => Err(BridgeError::cannot_parse(other, "Boolean")),
        },
        "Char" => {
            let mut chars = value_string.trim_matches('\'').chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c.to_string()),
                _ => Err(BridgeError::cannot_parse(value_string, "Char")),
            }
        }
        "Int32" | "Int16" | "Int64" | "Byte" | "UInt32" | "UInt16" | "UInt64" => value_string
            .parse::<i64>()
            .map(|v| v.to_string())
            .map_err(|_| BridgeError::cannot_parse(value_string, &value.data_type)),
        "Single" | "Double" => value_string
            .parse::<f64>()
            .map(|v| v.to_string())
            .map_err(|_| BridgeError::cannot_parse(value_string, &value.data_type)),
        other => Err(BridgeError::UnsupportedEvaluation(format!("cannot set a value of type '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primitive(data_type: &str) -> RuntimeValue {
        RuntimeValue {
            data_type: data_type.to_string(),
            type_descriptor: 1,
            is_null: false,
            is_primitive: true,
            is_value_type: true,
            is_array: false,
            is_boxed: false,
            payload: Some("false".to_string()),
            field_count: 0,
            array_length: 0,
        }
    }

    #[test]
    fn is_compiler_generated_matches_local_followed_by_digits() {
        assert!(is_compiler_generated("local1"));
        assert!(is_compiler_generated("local42"));
        assert!(!is_compiler_generated("local"));
        assert!(!is_compiler_generated("localCache"));
        assert!(!is_compiler_generated("sensor"));
    }

    #[test]
    fn set_variable_parses_boolean_and_rejects_garbage() {
        let value = primitive("Boolean");
        assert_eq!(set_variable(&value, "true").unwrap(), "True");
        let err = set_variable(&value, "banana").unwrap_err();
        assert_eq!(err.to_string(), "Cannot parse 'banana' as Boolean");
    }

    #[test]
    fn set_variable_rejects_null_target() {
        let mut value = primitive("Boolean");
        value.is_null = true;
        assert!(set_variable(&value, "true").is_err());
    }

    #[test]
    fn set_variable_rejects_non_primitive_target() {
        let mut value = primitive("Sensor");
        value.is_primitive = false;
        let err = set_variable(&value, "anything").unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedEvaluation(_)));
    }
}
