// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Symbol Resolver (C3): per-assembly method/line maps, queried in both
//! directions (spec.md §4.3). Source lookups are deterministic for a fixed
//! loaded symbol set; an unknown token or location returns `None`, never an
//! error.

use crate::loader::{SymbolFileLoader, SymbolsError};
use clrbridge_core::{DeviceMethodIndex, SymbolAssembly, SymbolMethodToken};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointLocation {
    pub assembly_name: String,
    pub method_token: SymbolMethodToken,
    pub il_offset: u32,
    pub file: String,
    /// The line the breakpoint actually lands on; may be later than the
    /// line requested if the request rounded forward to the nearest
    /// mapped line (spec.md §4.3 "line matching tolerates gaps").
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointLocation {
    pub assembly_name: String,
    pub method_token: SymbolMethodToken,
    pub il_offset: u32,
    pub file: String,
    pub line: u32,
}

#[derive(Default)]
pub struct SymbolResolver {
    assemblies: HashMap<String, SymbolAssembly>,
}

impl SymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_symbols(
        &mut self,
        path: &Path,
        loader: &dyn SymbolFileLoader,
    ) -> Result<(), SymbolsError> {
        let assembly = loader.load(path)?;
        tracing::info!(assembly = %assembly.name, file = ?path, "loaded symbol file");
        self.assemblies.insert(assembly.name.clone(), assembly);
        Ok(())
    }

    /// Loads every file a loader recognizes under `dir`, returning the
    /// count successfully loaded. Files the loader rejects are skipped
    /// with a warning rather than aborting the whole directory.
    pub fn load_symbols_from_directory(
        &mut self,
        dir: &Path,
        recursive: bool,
        loader: &dyn SymbolFileLoader,
    ) -> Result<usize, SymbolsError> {
        let mut count = 0;
        let entries = std::fs::read_dir(dir).map_err(|e| SymbolsError::Io(e.to_string()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    count += self.load_symbols_from_directory(&path, recursive, loader)?;
                }
                continue;
            }
            match self.load_symbols(&path, loader) {
                Ok(()) => count += 1,
                Err(e) => tracing::warn!(file = ?path, error = %e, "skipping unreadable symbol file"),
            }
        }
        Ok(count)
    }

    /// Registers an already-constructed assembly directly, bypassing a
    /// [`SymbolFileLoader`]. Used by callers that build symbol tables
    /// in-process (tests, embedded fixtures) rather than from a file.
    pub fn load_symbols_from_assembly(&mut self, assembly: SymbolAssembly) {
        self.assemblies.insert(assembly.name.clone(), assembly);
    }

    pub fn get_loaded_assemblies(&self) -> Vec<&str> {
        self.assemblies.keys().map(String::as_str).collect()
    }

    fn assembly(&self, name: &str) -> Option<&SymbolAssembly> {
        self.assemblies.get(name)
    }

    pub fn get_source_location(
        &self,
        assembly_name: &str,
        device_method_index: DeviceMethodIndex,
        ip: u32,
    ) -> Option<SourceLocation> {
        let assembly = self.assembly(assembly_name)?;
        let method = assembly.method_by_row(device_method_index.method_row())?;
        let (_, line) = method.line_at(ip)?;
        Some(SourceLocation { file: method.source_file.clone(), line })
    }

    /// From a user-chosen file:line, finds the first method covering a
    /// line at or after the request; on a tie picks the smallest line and,
    /// within that line, the smallest IL offset (spec.md §4.3).
    pub fn get_breakpoint_location(&self, file: &str, line: u32) -> Option<BreakpointLocation> {
        let mut best: Option<(&str, u32, SymbolMethodToken, u32)> = None;

        for assembly in self.assemblies.values() {
            let Some(rows) = assembly.lines_in_file(file) else { continue };
            if let Some((found_line, token, offset)) = rows.iter().find(|(l, _, _)| *l >= line).copied() {
                let better = match best {
                    None => true,
                    Some((_, best_line, _, best_offset)) => {
                        (found_line, offset) < (best_line, best_offset)
                    }
                };
                if better {
                    best = Some((&assembly.name, found_line, token, offset));
                }
            }
        }

        best.map(|(assembly_name, line, token, il_offset)| BreakpointLocation {
            assembly_name: assembly_name.to_string(),
            method_token: token,
            il_offset,
            file: file.to_string(),
            line,
        })
    }

    /// Every IL offset in the same method that begins a different source
    /// line than the one at `current_ip` (used for stepping in loops).
    pub fn get_all_step_targets(
        &self,
        assembly_name: &str,
        device_method_index: DeviceMethodIndex,
        current_ip: u32,
    ) -> Vec<(u32, u32, String)> {
        let Some(assembly) = self.assembly(assembly_name) else { return Vec::new() };
        let Some(method) = assembly.method_by_row(device_method_index.method_row()) else {
            return Vec::new();
        };
        method
            .step_targets_from(current_ip)
            .into_iter()
            .map(|(offset, line)| (offset, line, method.source_file.clone()))
            .collect()
    }

    /// The first strictly-later line in `file` with an IL offset, same
    /// method preferred when one is given.
    pub fn get_next_line_breakpoint_location(
        &self,
        file: &str,
        current_line: u32,
        device_method_index: Option<DeviceMethodIndex>,
    ) -> Option<BreakpointLocation> {
        if let Some(index) = device_method_index {
            for assembly in self.assemblies.values() {
                if let Some(method) = assembly.method_by_row(index.method_row()) {
                    if method.source_file == file {
                        if let Some((offset, line)) = method.next_line_after(current_line) {
                            return Some(BreakpointLocation {
                                assembly_name: assembly.name.clone(),
                                method_token: method.token,
                                il_offset: offset,
                                file: file.to_string(),
                                line,
                            });
                        }
                    }
                }
            }
        }
        self.get_breakpoint_location(file, current_line + 1)
    }

    pub fn get_local_variable_names(
        &self,
        assembly_name: &str,
        device_method_index: DeviceMethodIndex,
    ) -> Option<Vec<String>> {
        let assembly = self.assembly(assembly_name)?;
        let method = assembly.method_by_row(device_method_index.method_row())?;
        Some(method.locals.clone())
    }

    pub fn get_entry_point_location(&self) -> Option<EntryPointLocation> {
        for assembly in self.assemblies.values() {
            for method in assembly.methods.values() {
                if method.is_entry_point {
                    let (offset, line) = method.il_to_line.first().copied().unwrap_or((0, 0));
                    return Some(EntryPointLocation {
                        assembly_name: assembly.name.clone(),
                        method_token: method.token,
                        il_offset: offset,
                        file: method.source_file.clone(),
                        line,
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clrbridge_core::{AssemblyIndex, SymbolMethod};

    fn sample_resolver() -> SymbolResolver {
        let method = SymbolMethod {
            token: SymbolMethodToken(0x0600_0003),
            source_file: "Program.cs".into(),
            il_to_line: vec![(0x0000, 10), (0x0010, 11), (0x0020, 10)],
            locals: vec!["sensor".into(), "local1".into(), "reading".into()],
            is_entry_point: true,
        };
        let assembly = SymbolAssembly::new("App", vec![method]);
        let mut resolver = SymbolResolver::new();
        resolver.assemblies.insert("App".to_string(), assembly);
        resolver
    }

    #[test]
    fn get_source_location_uses_device_method_row() {
        let resolver = sample_resolver();
        let index = DeviceMethodIndex::new(AssemblyIndex(1), 3);
        let loc = resolver.get_source_location("App", index, 0x0010).unwrap();
        assert_eq!(loc.line, 11);
        assert_eq!(loc.file, "Program.cs");
    }

    #[test]
    fn get_breakpoint_location_rounds_forward_to_nearest_mapped_line() {
        let mut resolver = sample_resolver();
        let gapped = SymbolMethod {
            token: SymbolMethodToken(0x0600_0004),
            source_file: "Program.cs".into(),
            il_to_line: vec![(0x0000, 20), (0x0010, 25)],
            locals: vec![],
            is_entry_point: false,
        };
        resolver
            .assemblies
            .insert("Other".to_string(), SymbolAssembly::new("Other", vec![gapped]));

        // Line 22 has no direct mapping; the nearest mapped line at or
        // after it is 25, and the caller gets told the rounded line back.
        let loc = resolver.get_breakpoint_location("Program.cs", 22).unwrap();
        assert_eq!(loc.line, 25);
        assert_eq!(loc.il_offset, 0x0010);
    }

    #[test]
    fn get_breakpoint_location_returns_none_past_every_mapped_line() {
        let resolver = sample_resolver();
        assert_eq!(resolver.get_breakpoint_location("Program.cs", 999), None);
    }

    #[test]
    fn get_breakpoint_location_exact_hit() {
        let resolver = sample_resolver();
        let loc = resolver.get_breakpoint_location("Program.cs", 11).unwrap();
        assert_eq!(loc.line, 11);
        assert_eq!(loc.il_offset, 0x0010);
    }

    #[test]
    fn unknown_token_returns_none_not_panic() {
        let resolver = sample_resolver();
        let index = DeviceMethodIndex::new(AssemblyIndex(1), 0xDEAD);
        assert_eq!(resolver.get_source_location("App", index, 0), None);
    }

    #[test]
    fn get_entry_point_location_finds_flagged_method() {
        let resolver = sample_resolver();
        let entry = resolver.get_entry_point_location().unwrap();
        assert_eq!(entry.assembly_name, "App");
        assert_eq!(entry.line, 10);
    }
}
