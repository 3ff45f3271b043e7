// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Symbol files are consumed opaquely through a format-specific loader
//! that yields the logical tables in spec.md §3; this crate never decodes
//! raw bytes itself beyond the one reference loader below (spec.md §6).

use clrbridge_core::{SymbolAssembly, SymbolMethod, SymbolMethodToken};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SymbolsError {
    #[error("could not read symbol file: {0}")]
    Io(String),
    #[error("could not parse symbol file: {0}")]
    Parse(String),
}

pub trait SymbolFileLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<SymbolAssembly, SymbolsError>;
}

#[derive(Deserialize)]
struct JsonMethod {
    token: u32,
    source_file: String,
    il_to_line: Vec<(u32, u32)>,
    #[serde(default)]
    locals: Vec<String>,
    #[serde(default)]
    is_entry_point: bool,
}

#[derive(Deserialize)]
struct JsonAssembly {
    assembly: String,
    methods: Vec<JsonMethod>,
}

/// The one concrete per-assembly symbol-file loader this workspace ships:
/// a JSON rendering of the logical schema in spec.md §3. A deployment
/// targeting real nanoFramework `.pdbx`/portable-PDB symbol streams swaps
/// this for a loader that decodes those formats into the same
/// [`SymbolAssembly`] shape; nothing downstream of `SymbolResolver` cares
/// which loader produced it.
#[derive(Default)]
pub struct JsonSymbolLoader;

impl SymbolFileLoader for JsonSymbolLoader {
    fn load(&self, path: &Path) -> Result<SymbolAssembly, SymbolsError> {
        let text = std::fs::read_to_string(path).map_err(|e| SymbolsError::Io(e.to_string()))?;
        let parsed: JsonAssembly =
            serde_json::from_str(&text).map_err(|e| SymbolsError::Parse(e.to_string()))?;

        let methods = parsed
            .methods
            .into_iter()
            .map(|m| SymbolMethod {
                token: SymbolMethodToken(m.token),
                source_file: m.source_file,
                il_to_line: m.il_to_line,
                locals: m.locals,
                is_entry_point: m.is_entry_point,
            })
            .collect();

        Ok(SymbolAssembly::new(parsed.assembly, methods))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn json_loader_parses_the_documented_schema() {
        let mut file = tempfile_named();
        writeln!(
            file,
            r#"{{
                "assembly": "App",
                "methods": [
                    {{
                        "token": 100925443,
                        "source_file": "Program.cs",
                        "il_to_line": [[0, 42]],
                        "locals": ["sensor"],
                        "is_entry_point": true
                    }}
                ]
            }}"#
        )
        .unwrap();
        let path = file.into_temp_path();

        let loader = JsonSymbolLoader;
        let assembly = loader.load(&path).unwrap();
        assert_eq!(assembly.name, "App");
        assert_eq!(assembly.methods.len(), 1);
    }

    fn tempfile_named() -> tempfile::NamedTempFile {
        tempfile::Builder::new().suffix(".json").tempfile().unwrap()
    }
}
