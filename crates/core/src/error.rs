// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use thiserror::Error;

/// The facade's error taxonomy (spec.md §7). Every facade operation returns
/// `Result<_, BridgeError>`; this type never unwinds across the boundary.
#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    #[error("not connected to a device")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("device rejected operation: {0}")]
    ProtocolRejected(String),

    #[error("could not resolve symbol: {0}")]
    UnresolvedSymbol(String),

    #[error("handle is no longer valid")]
    InvalidHandle,

    #[error("{0}")]
    UnsupportedEvaluation(String),

    #[error("device rebooted")]
    DeviceRebooted,
}

impl BridgeError {
    pub fn cannot_evaluate(expr: &str) -> Self {
        BridgeError::UnsupportedEvaluation(format!("Cannot evaluate '{expr}'"))
    }

    pub fn cannot_parse(value: &str, data_type: &str) -> Self {
        BridgeError::UnsupportedEvaluation(format!("Cannot parse '{value}' as {data_type}"))
    }
}
