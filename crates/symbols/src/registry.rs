// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Assembly Registry (C2): the bijection between symbol-file assembly
//! names and device assembly indices (spec.md §4.2).

use clrbridge_core::AssemblyIndex;
use std::collections::HashMap;
use std::path::PathBuf;

/// Extensions a device or symbol file may or may not include; both sides
/// are normalized identically so it never matters which one carries it
/// (see DESIGN.md, Open Question 1).
const KNOWN_EXTENSIONS: &[&str] = &["dll", "exe", "pe"];

fn normalize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    for ext in KNOWN_EXTENSIONS {
        let suffix = format!(".{ext}");
        if let Some(stripped) = lower.strip_suffix(&suffix) {
            return stripped.to_string();
        }
    }
    lower
}

#[derive(Debug, Clone)]
struct Entry {
    display_name: String,
    version: String,
    flags: u32,
    index: AssemblyIndex,
}

#[derive(Debug, Default)]
pub struct AssemblyRegistry {
    by_normalized_name: HashMap<String, Entry>,
    by_index: HashMap<AssemblyIndex, String>,
    search_paths: Vec<PathBuf>,
}

impl AssemblyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a device assembly. On a name collision the
    /// latest registration wins and a warning is logged (spec.md §4.2).
    pub fn register_device_assembly(&mut self, name: &str, version: &str, flags: u32, raw_idx: u32) {
        let key = normalize(name);
        let index = AssemblyIndex(raw_idx);

        if let Some(previous) = self.by_normalized_name.get(&key) {
            if previous.index != index {
                tracing::warn!(
                    name,
                    previous_index = %previous.index,
                    new_index = %index,
                    "assembly name collision, latest registration wins"
                );
            }
            self.by_index.remove(&previous.index);
        }

        self.by_index.insert(index, name.to_string());
        self.by_normalized_name.insert(
            key,
            Entry {
                display_name: name.to_string(),
                version: version.to_string(),
                flags,
                index,
            },
        );
    }

    /// Looks up by name, tolerating a missing or present extension and
    /// case on either side.
    pub fn get_device_assembly(&self, name: &str) -> Option<AssemblyIndex> {
        self.by_normalized_name.get(&normalize(name)).map(|e| e.index)
    }

    pub fn get_assembly_by_device_index(&self, idx: AssemblyIndex) -> Option<&str> {
        self.by_index.get(&idx).map(String::as_str)
    }

    pub fn get_assembly_index(&self, name: &str) -> Option<AssemblyIndex> {
        self.get_device_assembly(name)
    }

    pub fn version_of(&self, name: &str) -> Option<&str> {
        self.by_normalized_name.get(&normalize(name)).map(|e| e.version.as_str())
    }

    pub fn flags_of(&self, name: &str) -> Option<u32> {
        self.by_normalized_name.get(&normalize(name)).map(|e| e.flags)
    }

    pub fn add_search_path(&mut self, dir: PathBuf) {
        self.search_paths.push(dir);
    }

    /// Lists candidate symbol files under the registered search paths.
    /// This is a filesystem scan only; deciding *which* file backs which
    /// assembly is the caller's job (it loads each through a
    /// [`crate::SymbolFileLoader`]).
    pub fn scan_local_assemblies(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for dir in &self.search_paths {
            let Ok(entries) = std::fs::read_dir(dir) else { continue };
            for entry in entries.flatten() {
                found.push(entry.path());
            }
        }
        found
    }

    pub fn clear(&mut self) {
        self.by_normalized_name.clear();
        self.by_index.clear();
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_normalized_name.values().map(|e| e.display_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_extension_and_case() {
        let mut registry = AssemblyRegistry::new();
        registry.register_device_assembly("Foo.dll", "1.0.0", 0, 0x0002_0000);

        assert_eq!(registry.get_device_assembly("Foo"), Some(AssemblyIndex(0x0002_0000)));
        assert_eq!(registry.get_device_assembly("foo.DLL"), Some(AssemblyIndex(0x0002_0000)));
        assert_eq!(registry.get_assembly_by_device_index(AssemblyIndex(0x0002_0000)), Some("Foo.dll"));
    }

    #[test]
    fn later_registration_wins_on_name_collision() {
        let mut registry = AssemblyRegistry::new();
        registry.register_device_assembly("App", "1.0.0", 0, 1);
        registry.register_device_assembly("App", "2.0.0", 0, 2);

        assert_eq!(registry.get_device_assembly("App"), Some(AssemblyIndex(2)));
        assert_eq!(registry.get_assembly_by_device_index(AssemblyIndex(1)), None);
    }

    #[test]
    fn clear_drops_every_entry() {
        let mut registry = AssemblyRegistry::new();
        registry.register_device_assembly("App", "1.0.0", 0, 1);
        registry.clear();
        assert_eq!(registry.get_device_assembly("App"), None);
    }
}
