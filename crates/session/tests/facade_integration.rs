// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Exercises `DebugSession` end to end using only its public API, for the
//! parts of the session lifecycle that do not require a live device
//! connection (spec.md §8 scenario 1 and the handle-invalidation
//! invariant).

use clrbridge_session::{DebugSession, SessionConfig};
use clrbridge_symbols::JsonSymbolLoader;
use std::io::Write;

fn write_symbol_file(contents: &str) -> tempfile::TempPath {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, "{contents}").unwrap();
    file.into_temp_path()
}

/// A breakpoint set before any symbols are loaded is pending; loading the
/// matching symbol file afterward verifies it in place and reports the
/// transition through the event channel, without the caller having to call
/// `set_breakpoint` again (spec.md §8 scenario 1).
#[test]
fn breakpoint_set_before_symbols_verifies_once_symbols_load() {
    let (mut session, events) = DebugSession::new(SessionConfig::default());

    let outcome = session.set_breakpoint("Program.cs", 42, None);
    assert!(!outcome.verified);
    assert_eq!(outcome.message.as_deref(), Some("symbols not loaded"));

    let path = write_symbol_file(
        r#"{
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
        }"#,
    );
    let loader = JsonSymbolLoader;
    session.load_symbols(&path, &loader).unwrap();

    let breakpoint = session.breakpoints().get(outcome.id).unwrap();
    assert!(breakpoint.verified);
    assert_eq!(breakpoint.line, 42);

    let changed = events
        .try_iter()
        .find_map(|event| match event {
            clrbridge_core::Event::BreakpointChanged { breakpoint }
                if breakpoint.id == outcome.id && breakpoint.verified =>
            {
                Some(breakpoint)
            }
            _ => None,
        })
        .expect("a breakpoint{changed} event reporting verified=true should have been emitted");
    assert!(changed.verified);
}

/// Loading symbols with nothing pending is a harmless no-op: it must not
/// emit a spurious `breakpoint{changed}` event.
#[test]
fn loading_symbols_with_no_pending_breakpoints_emits_nothing() {
    let (mut session, events) = DebugSession::new(SessionConfig::default());

    let path = write_symbol_file(
        r#"{"assembly": "App", "methods": []}"#,
    );
    let loader = JsonSymbolLoader;
    session.load_symbols(&path, &loader).unwrap();

    assert!(events.try_recv().is_err());
}
