// clrbridge - Embedded CLR Debug Bridge
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Wire Transport (C1): framed request/reply and asynchronous event
//! delivery over a serial or TCP byte stream, with typed device
//! operations. Requests serialize on a per-connection lock; a lost framing
//! sync triggers reconnect rather than retry of the offending request
//! (spec.md §4.1).

pub mod channel;
pub mod codec;
pub mod protocol;

use channel::DeviceStream;
use clrbridge_core::BridgeError;
use codec::{DeviceCodec, WireMessage};
use crossbeam_channel::Sender;
use protocol::{DeviceEvent, DeviceOperation, DeviceReply};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default per-operation timeouts (spec.md §5).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const STEP_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("i/o error talking to device: {0}")]
    Io(String),
    #[error("framing lost: {0}")]
    Framing(String),
    #[error("timed out waiting for a reply")]
    Timeout,
    #[error("device rejected the operation: {0}")]
    Rejected(String),
}

impl From<TransportError> for BridgeError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Rejected(msg) => BridgeError::ProtocolRejected(msg),
            other => BridgeError::Transport(other.to_string()),
        }
    }
}

/// Owns the byte stream and the request-dispatch lock (spec.md §3
/// ownership note: "Wire Transport owns the byte stream and a
/// request-dispatch mutex").
pub struct WireTransport {
    stream: Mutex<Box<dyn DeviceStream>>,
    codec: Box<dyn DeviceCodec>,
    next_seq: AtomicU32,
    events: Sender<DeviceEvent>,
}

impl WireTransport {
    pub fn new(
        stream: Box<dyn DeviceStream>,
        codec: Box<dyn DeviceCodec>,
        events: Sender<DeviceEvent>,
    ) -> Self {
        WireTransport {
            stream: Mutex::new(stream),
            codec,
            next_seq: AtomicU32::new(1),
            events,
        }
    }

    /// Swap in a freshly (re)established stream after a reconnect. The
    /// dispatch lock is held for the duration, so no in-flight request can
    /// observe half of the old and half of the new connection.
    pub fn reattach(&self, stream: Box<dyn DeviceStream>) {
        *self.stream.lock().unwrap() = stream;
    }

    /// Send one request and block for its matching reply. Any event frames
    /// encountered while waiting are forwarded to the event channel rather
    /// than discarded, per the "asynchronous event delivery" contract.
    pub fn request(&self, op: DeviceOperation, timeout: Duration) -> Result<DeviceReply, TransportError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let frame = self.codec.encode_request(seq, &op);

        let mut stream = self.stream.lock().unwrap();
        write_frame(stream.as_mut(), &frame).map_err(|e| TransportError::Io(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let _ = stream.set_read_timeout(remaining.min(Duration::from_millis(500)));

            let bytes = match read_frame(stream.as_mut()) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue, // read timed out this tick, keep waiting on the deadline
                Err(e) => return Err(TransportError::Framing(e.to_string())),
            };

            match self.codec.decode(&bytes) {
                Ok(WireMessage::Reply { seq: reply_seq, reply }) => {
                    if reply_seq == seq {
                        return Ok(reply);
                    }
                    tracing::warn!(expected = seq, got = reply_seq, "discarding stale reply");
                }
                Ok(WireMessage::Event(event)) => {
                    let _ = self.events.send(event);
                }
                Err(e) => return Err(TransportError::Framing(e)),
            }
        }
    }
}

fn write_frame<W: Write + ?Sized>(w: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let len = payload.len() as u32;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Reads one length-prefixed frame. `Ok(None)` means the read timed out
/// before a length prefix arrived (not a framing error, just nothing yet);
/// a short read once a length has been observed is always a framing error.
fn read_frame<R: Read + ?Sized>(r: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match r.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
            return Ok(None);
        }
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    const MAX_FRAME: usize = 16 * 1024 * 1024;
    if len > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds sanity limit"),
        ));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use std::collections::VecDeque;
    use std::io;

    /// An in-memory duplex stream standing in for a real serial/TCP link,
    /// in the same spirit as the teacher building a real `Machine` in
    /// tests rather than mocking the whole device.
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

    #[test]
    fn request_matches_reply_by_sequence_number() {
        let codec = JsonCodec;
        let reply_frame = codec.encode_request(1, &DeviceOperation::Connect); // placeholder encode path unused
        let _ = reply_frame;

        // Build a reply envelope by hand and frame it as the device would.
        let reply_bytes = serde_json::to_vec(&serde_json::json!({
            "kind": "Reply",
            "seq": 1,
            "reply": "Ok",
        }))
        .unwrap();
        let mut inbound = VecDeque::new();
        inbound.extend((reply_bytes.len() as u32).to_le_bytes());
        inbound.extend(reply_bytes);

        let stream: Box<dyn DeviceStream> = Box::new(LoopbackStream { inbound, outbound: Vec::new() });
        let (tx, _rx) = crossbeam_channel::unbounded();
        let transport = WireTransport::new(stream, Box::new(JsonCodec), tx);

        let reply = transport.request(DeviceOperation::GetExecutionMode, Duration::from_secs(1)).unwrap();
        assert!(matches!(reply, DeviceReply::Ok));
    }

    #[test]
    fn request_times_out_with_no_reply() {
        let stream: Box<dyn DeviceStream> =
            Box::new(LoopbackStream { inbound: VecDeque::new(), outbound: Vec::new() });
        let (tx, _rx) = crossbeam_channel::unbounded();
        let transport = WireTransport::new(stream, Box::new(JsonCodec), tx);

        let result = transport.request(DeviceOperation::GetExecutionMode, Duration::from_millis(50));
        assert!(matches!(result, Err(TransportError::Timeout)));
    }
}
