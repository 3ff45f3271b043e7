// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Breakpoint Manager (C4): owns user breakpoints (verified and pending),
//! computes device descriptors, and re-applies them across reboots
//! (spec.md §4.4).

use clrbridge_core::{
    AssemblyIndex, Breakpoint, BreakpointFlags, DeviceBreakpointDescriptor, DeviceMethodIndex,
    ThreadFilter,
};
use clrbridge_symbols::{AssemblyRegistry, SymbolResolver};
use std::collections::BTreeMap;

/// Assembly index substituted when a resolved assembly has not been
/// registered yet (spec.md §4.4 step 3; DESIGN.md Open Question 3).
const FALLBACK_ASSEMBLY_INDEX: u32 = 1;

#[derive(Debug, Clone)]
pub struct SetBreakpointOutcome {
    pub id: i64,
    pub verified: bool,
    pub actual_line: Option<u32>,
    pub message: Option<String>,
}

#[derive(Default)]
pub struct BreakpointManager {
    next_id: i64,
    breakpoints: BTreeMap<i64, Breakpoint>,
}

impl BreakpointManager {
    pub fn new() -> Self {
        BreakpointManager { next_id: 1, breakpoints: BTreeMap::new() }
    }

    pub fn get(&self, id: i64) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn set_breakpoint(
        &mut self,
        resolver: &SymbolResolver,
        registry: &AssemblyRegistry,
        source_path: &str,
        line: u32,
        condition: Option<String>,
    ) -> SetBreakpointOutcome {
        let id = self.next_id;
        self.next_id += 1;

        let breakpoint = resolve_breakpoint(resolver, registry, id, source_path, line, condition);
        let outcome = SetBreakpointOutcome {
            id,
            verified: breakpoint.verified,
            actual_line: breakpoint.verified.then_some(breakpoint.line),
            message: breakpoint.message.clone(),
        };
        self.breakpoints.insert(id, breakpoint);
        outcome
    }

    pub fn remove_breakpoint(&mut self, id: i64) -> bool {
        self.breakpoints.remove(&id).is_some()
    }

    /// Re-resolves every breakpoint still pending. Returns the ids that
    /// became verified as a result, so the caller can push the device list
    /// and emit `breakpoint{changed}` events.
    pub fn rebind_pending(&mut self, resolver: &SymbolResolver, registry: &AssemblyRegistry) -> Vec<i64> {
        let mut newly_verified = Vec::new();
        for (id, breakpoint) in self.breakpoints.iter_mut() {
            if breakpoint.verified {
                continue;
            }
            let resolved = resolve_breakpoint(
                resolver,
                registry,
                *id,
                &breakpoint.source_path,
                breakpoint.line,
                breakpoint.condition.clone(),
            );
            if resolved.verified {
                newly_verified.push(*id);
            }
            *breakpoint = resolved;
        }
        newly_verified
    }

    /// Re-resolves every breakpoint (verified or not) since assembly
    /// indices may have shifted across a reboot. Deterministic given the
    /// same inputs, so running it twice in a row is a no-op the second
    /// time (spec.md §8 idempotence law).
    pub fn reapply_all_after_reboot(&mut self, resolver: &SymbolResolver, registry: &AssemblyRegistry) {
        for (id, breakpoint) in self.breakpoints.iter_mut() {
            *breakpoint = resolve_breakpoint(
                resolver,
                registry,
                *id,
                &breakpoint.source_path,
                breakpoint.line,
                breakpoint.condition.clone(),
            );
        }
    }

    pub fn mark_rejected(&mut self, id: i64, reason: String) {
        if let Some(breakpoint) = self.breakpoints.get_mut(&id) {
            breakpoint.verified = false;
            breakpoint.device_descriptor = None;
            breakpoint.message = Some(reason);
        }
    }

    /// The active descriptor list: exactly the verified user breakpoints
    /// (spec.md §4.4 invariant).
    pub fn active_descriptors(&self) -> Vec<DeviceBreakpointDescriptor> {
        self.breakpoints
            .values()
            .filter(|b| b.verified)
            .filter_map(|b| b.device_descriptor)
            .collect()
    }

    pub fn find_user_breakpoint_at(
        &self,
        method_index: DeviceMethodIndex,
        ip: u32,
    ) -> Option<&Breakpoint> {
        self.breakpoints
            .values()
            .filter(|b| b.verified)
            .find(|b| b.device_descriptor.is_some_and(|d| d.matches_location(method_index, ip)))
    }
}

fn resolve_breakpoint(
    resolver: &SymbolResolver,
    registry: &AssemblyRegistry,
    id: i64,
    source_path: &str,
    line: u32,
    condition: Option<String>,
) -> Breakpoint {
    let Some(location) = resolver.get_breakpoint_location(source_path, line) else {
        return Breakpoint {
            id,
            source_path: source_path.to_string(),
            line,
            verified: false,
            message: Some("symbols not loaded".to_string()),
            condition,
            device_descriptor: None,
        };
    };

    let (assembly_idx, message) = match registry.get_assembly_index(&location.assembly_name) {
        Some(idx) => (idx, None),
        None => (
            AssemblyIndex(FALLBACK_ASSEMBLY_INDEX),
            Some(format!(
                "assembly '{}' not registered, defaulting to index {}",
                location.assembly_name, FALLBACK_ASSEMBLY_INDEX
            )),
        ),
    };

    let method_row = (location.method_token.0 & 0xFFFF) as u16;
    let method_index = DeviceMethodIndex::new(assembly_idx, method_row);

    let descriptor = DeviceBreakpointDescriptor {
        id: id as i32,
        flags: BreakpointFlags::HARD,
        thread_filter: ThreadFilter::Any,
        stack_depth: 0,
        method_index,
        ip: location.il_offset,
        ip_start: 0,
        ip_end: 0,
    };

    Breakpoint {
        id,
        source_path: location.file,
        line: location.line,
        verified: true,
        message,
        condition,
        device_descriptor: Some(descriptor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clrbridge_core::{SymbolAssembly, SymbolMethod, SymbolMethodToken};

    fn resolver_with_app() -> SymbolResolver {
        let mut resolver = SymbolResolver::new();
        let method = SymbolMethod {
            token: SymbolMethodToken(0x0600_0003),
            source_file: "Program.cs".into(),
            il_to_line: vec![(0x0005, 42)],
            locals: vec![],
            is_entry_point: false,
        };
        resolver.load_symbols_from_assembly(SymbolAssembly::new("App", vec![method]));
        resolver
    }

    #[test]
    fn set_breakpoint_without_symbols_is_pending() {
        let resolver = SymbolResolver::new();
        let registry = AssemblyRegistry::new();
        let mut manager = BreakpointManager::new();

        let outcome = manager.set_breakpoint(&resolver, &registry, "Program.cs", 42, None);
        assert!(!outcome.verified);
        assert_eq!(outcome.message.as_deref(), Some("symbols not loaded"));
        assert_eq!(manager.active_descriptors().len(), 0);
    }

    #[test]
    fn set_breakpoint_with_symbols_and_registered_assembly_verifies() {
        let resolver = resolver_with_app();
        let mut registry = AssemblyRegistry::new();
        registry.register_device_assembly("App", "1.0.0", 0, 7 << 16);

        let mut manager = BreakpointManager::new();
        let outcome = manager.set_breakpoint(&resolver, &registry, "Program.cs", 42, None);
        assert!(outcome.verified);
        assert_eq!(outcome.actual_line, Some(42));

        let descriptors = manager.active_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].method_index, DeviceMethodIndex::new(AssemblyIndex(7), 3));
        assert_eq!(descriptors[0].ip, 5);
    }

    #[test]
    fn set_breakpoint_falls_back_to_assembly_index_one_when_unregistered() {
        let resolver = resolver_with_app();
        let registry = AssemblyRegistry::new();
        let mut manager = BreakpointManager::new();

        let outcome = manager.set_breakpoint(&resolver, &registry, "Program.cs", 42, None);
        assert!(outcome.verified);
        assert!(outcome.message.unwrap().contains("defaulting to index 1"));
    }

    #[test]
    fn remove_then_set_breakpoints_yields_empty_active_list() {
        let resolver = resolver_with_app();
        let mut registry = AssemblyRegistry::new();
        registry.register_device_assembly("App", "1.0.0", 0, 7 << 16);
        let mut manager = BreakpointManager::new();

        let outcome = manager.set_breakpoint(&resolver, &registry, "Program.cs", 42, None);
        assert!(manager.remove_breakpoint(outcome.id));
        assert_eq!(manager.active_descriptors().len(), 0);
    }

    #[test]
    fn reapply_all_after_reboot_is_idempotent() {
        let resolver = resolver_with_app();
        let mut registry = AssemblyRegistry::new();
        registry.register_device_assembly("App", "1.0.0", 0, 7 << 16);
        let mut manager = BreakpointManager::new();
        manager.set_breakpoint(&resolver, &registry, "Program.cs", 42, None);

        manager.reapply_all_after_reboot(&resolver, &registry);
        let first = manager.active_descriptors();
        manager.reapply_all_after_reboot(&resolver, &registry);
        let second = manager.active_descriptors();
        assert_eq!(first, second);
    }
}
