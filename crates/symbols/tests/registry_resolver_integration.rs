// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! End-to-end coverage of loading a symbol file and resolving it against a
//! device-reported assembly index, exercising only the public API of
//! `clrbridge-symbols`.

use clrbridge_core::{AssemblyIndex, DeviceMethodIndex};
use clrbridge_symbols::{AssemblyRegistry, JsonSymbolLoader, SymbolResolver};
use std::io::Write;

fn write_symbol_file(contents: &str) -> tempfile::TempPath {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, "{contents}").unwrap();
    file.into_temp_path()
}

/// A symbol file mapping line 42 to method token 0x06000003, IL offset
/// 0x0005, assembly "App" (spec.md §8 scenario 1).
const PROGRAM_SYMBOLS: &str = r#"{
    "assembly": "App",
    "methods": [
        {
            "token": 100925443,
            "source_file": "Program.cs",
            "il_to_line": [[5, 42]],
            "locals": [],
            "is_entry_point": false
        }
    ]
}"#;

#[test]
fn breakpoint_location_resolves_to_device_method_index_for_registered_assembly() {
    let path = write_symbol_file(PROGRAM_SYMBOLS);
    let loader = JsonSymbolLoader;
    let mut resolver = SymbolResolver::new();
    resolver.load_symbols(&path, &loader).unwrap();

    let mut registry = AssemblyRegistry::new();
    registry.register_device_assembly("App.dll", "1.0.0", 0, 7);

    let location = resolver.get_breakpoint_location("Program.cs", 42).unwrap();
    assert_eq!(location.line, 42);
    assert_eq!(location.il_offset, 0x0005);
    assert_eq!(location.assembly_name, "App");

    // Case-insensitive, extension-tolerant name matching (spec.md §4.2).
    let assembly_index = registry.get_assembly_index(&location.assembly_name).unwrap();
    assert_eq!(assembly_index, AssemblyIndex(7));

    let device_index =
        DeviceMethodIndex::new(assembly_index, (location.method_token.0 & 0xFFFF) as u16);
    assert_eq!(device_index.assembly_index(), AssemblyIndex(7));
    assert_eq!(device_index.method_row(), 3);

    let source = resolver
        .get_source_location(&location.assembly_name, device_index, location.il_offset)
        .unwrap();
    assert_eq!(source.file, "Program.cs");
    assert_eq!(source.line, 42);
}

/// Step-over in a loop body: the next step target must land on the
/// following source line in the same method, not the back-edge that
/// returns to the loop header (spec.md §8 scenario 2).
#[test]
fn next_line_step_target_skips_the_loop_back_edge() {
    let symbols = r#"{
        "assembly": "App",
        "methods": [
            {
                "token": 100925443,
                "source_file": "Program.cs",
                "il_to_line": [[16, 10], [32, 11], [48, 10]],
                "locals": [],
                "is_entry_point": false
            }
        ]
    }"#;
    let path = write_symbol_file(symbols);
    let loader = JsonSymbolLoader;
    let mut resolver = SymbolResolver::new();
    resolver.load_symbols(&path, &loader).unwrap();

    let mut registry = AssemblyRegistry::new();
    registry.register_device_assembly("App", "1.0.0", 0, 1);
    let assembly_index = registry.get_assembly_index("App").unwrap();
    let method_index = DeviceMethodIndex::new(assembly_index, 3);

    let next = resolver
        .get_next_line_breakpoint_location("Program.cs", 10, Some(method_index))
        .unwrap();
    assert_eq!(next.line, 11);
    assert_eq!(next.il_offset, 0x0020);
}

/// Unresolved device assembly names fall back to the documented default
/// so a breakpoint or step can still be planted (spec.md §4.4 step 3,
/// Open Question 3).
#[test]
fn assembly_registry_name_matching_is_case_and_extension_tolerant() {
    let mut registry = AssemblyRegistry::new();
    registry.register_device_assembly("App.dll", "1.0.0", 0, 4);

    assert_eq!(registry.get_assembly_index("app"), Some(AssemblyIndex(4)));
    assert_eq!(registry.get_assembly_index("APP.DLL"), Some(AssemblyIndex(4)));
    assert_eq!(registry.get_assembly_index("App"), Some(AssemblyIndex(4)));
    assert_eq!(registry.get_assembly_index("Missing"), None);
}
