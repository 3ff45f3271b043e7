// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Exercises `WireTransport` end to end over an in-memory duplex stream,
//! using only the crate's public API (same spirit as the teacher's
//! in-process `Machine` integration tests rather than mocking the device).

use clrbridge_transport::channel::DeviceStream;
use clrbridge_transport::codec::JsonCodec;
use clrbridge_transport::protocol::{DeviceEvent, DeviceOperation, DeviceReply};
use clrbridge_transport::WireTransport;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

struct LoopbackStream {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
}

impl Read for LoopbackStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"));
        }
        let n = buf.len().min(self.inbound.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.inbound.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for LoopbackStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DeviceStream for LoopbackStream {
    fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

fn frame(bytes: Vec<u8>) -> Vec<u8> {
    let mut out = (bytes.len() as u32).to_le_bytes().to_vec();
    out.extend(bytes);
    out
}

/// An event frame delivered ahead of the matching reply must still be
/// forwarded to the event channel rather than discarded or mistaken for
/// the reply (spec.md §4.1 "asynchronous event delivery").
#[test]
fn event_frames_ahead_of_a_reply_are_forwarded_not_dropped() {
    let event_bytes = serde_json::to_vec(&serde_json::json!({
        "kind": "Event",
        "event": { "Message": "device booted" },
    }))
    .unwrap();
    let reply_bytes = serde_json::to_vec(&serde_json::json!({
        "kind": "Reply",
        "seq": 1,
        "reply": "Ok",
    }))
    .unwrap();

    let mut inbound = VecDeque::new();
    inbound.extend(frame(event_bytes));
    inbound.extend(frame(reply_bytes));

    let stream: Box<dyn DeviceStream> = Box::new(LoopbackStream { inbound, outbound: Vec::new() });
    let (tx, rx) = crossbeam_channel::unbounded();
    let transport = WireTransport::new(stream, Box::new(JsonCodec), tx);

    let reply = transport.request(DeviceOperation::GetExecutionMode, Duration::from_secs(1)).unwrap();
    assert!(matches!(reply, DeviceReply::Ok));

    let event = rx.try_recv().expect("event frame should have been forwarded");
    match event {
        DeviceEvent::Message(text) => assert_eq!(text, "device booted"),
    }
}

/// A reply for a stale sequence number (left over from a prior, already
/// abandoned request) is discarded rather than handed back as this
/// request's answer.
#[test]
fn stale_sequence_numbered_replies_are_discarded() {
    let stale = serde_json::to_vec(&serde_json::json!({
        "kind": "Reply",
        "seq": 999,
        "reply": "Ok",
    }))
    .unwrap();
    let current = serde_json::to_vec(&serde_json::json!({
        "kind": "Reply",
        "seq": 1,
        "reply": { "ThreadList": [1, 2] },
    }))
    .unwrap();

    let mut inbound = VecDeque::new();
    inbound.extend(frame(stale));
    inbound.extend(frame(current));

    let stream: Box<dyn DeviceStream> = Box::new(LoopbackStream { inbound, outbound: Vec::new() });
    let (tx, _rx) = crossbeam_channel::unbounded();
    let transport = WireTransport::new(stream, Box::new(JsonCodec), tx);

    let reply = transport.request(DeviceOperation::GetThreadList, Duration::from_secs(1)).unwrap();
    assert!(matches!(reply, DeviceReply::ThreadList(threads) if threads == vec![1, 2]));
}
