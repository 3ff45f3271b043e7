// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::protocol::{DeviceEvent, DeviceOperation, DeviceReply};

/// One request/reply/event envelope on the wire. A codec turns
/// [`DeviceOperation`]s into bytes and bytes back into either a reply
/// correlated by sequence number or an unsolicited event.
///
/// The actual bit layout is firmware-defined and out of scope for this
/// crate (spec.md §1, §6); [`JsonCodec`] is the one concrete implementation
/// shipped here, standing in for whatever binary codec a real firmware
/// library provides.
pub trait DeviceCodec: Send {
    fn encode_request(&self, seq: u32, op: &DeviceOperation) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<WireMessage, String>;
}

pub enum WireMessage {
    Reply { seq: u32, reply: DeviceReply },
    Event(DeviceEvent),
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
enum Envelope {
    Request { seq: u32, op: DeviceOperation },
    Reply { seq: u32, reply: DeviceReply },
    Event { event: DeviceEvent },
}

/// Reference codec used by tests and the in-memory fake device. Real
/// deployments swap this for whatever codec matches the firmware's actual
/// binary framing; nothing in [`crate::WireTransport`] depends on JSON.
#[derive(Default)]
pub struct JsonCodec;

impl DeviceCodec for JsonCodec {
    fn encode_request(&self, seq: u32, op: &DeviceOperation) -> Vec<u8> {
        let envelope = Envelope::Request { seq, op: op.clone() };
        serde_json::to_vec(&envelope).expect("DeviceOperation is always serializable")
    }

    fn decode(&self, bytes: &[u8]) -> Result<WireMessage, String> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        Ok(match envelope {
            Envelope::Reply { seq, reply } => WireMessage::Reply { seq, reply },
            Envelope::Event { event } => WireMessage::Event(event),
            Envelope::Request { .. } => {
                return Err("received a request envelope on the reply channel".to_string())
            }
        })
    }
}
