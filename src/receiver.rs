// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use crate::gate::{GateError, Shutdown, TransportGate};
use crate::link::Link;
use crate::protocol::*;
use crate::serial::SerialPort;

const FRAME_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("out of memory holding {0} bytes")]
    OutOfMemory(usize),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("Transfer complete")]
    TransferComplete,
}

impl From<GateError> for ReceiverError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Io(e) => ReceiverError::Io(e),
            GateError::Cancelled => ReceiverError::Cancelled,
        }
    }
}

// ============================================================================
// States
// ============================================================================

pub struct WaitSize;
pub struct ReceiveChunks;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    link: Link,
    gate: TransportGate,
    shutdown: Shutdown,
    output: PathBuf,
    total: usize,
    buffer: Vec<u8>,
    received: usize,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            link: self.link,
            gate: self.gate,
            shutdown: self.shutdown,
            output: self.output,
            total: self.total,
            buffer: self.buffer,
            received: self.received,
        })
    }

    fn io_error(&self, e: std::io::Error) -> ReceiverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ReceiverError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn reply(&mut self, token: &[u8]) -> Result<(), ReceiverError> {
        self.gate.acquire(self.link.serial(), &self.shutdown)?;
        self.link.send_frame(token).map_err(|e| self.io_error(e))?;
        tracing::debug!(reply = %String::from_utf8_lossy(token), "Sent");
        Ok(())
    }

    /// Next well-formed frame, or `None` if nothing usable arrived.
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, ReceiverError> {
        if self.shutdown.is_triggered() {
            return Err(ReceiverError::Cancelled);
        }

        match self.link.next_frame(FRAME_POLL).map_err(|e| self.io_error(e))? {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn finish(&mut self) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        self.buffer.truncate(self.total);
        std::fs::write(&self.output, &self.buffer)?;
        tracing::info!(bytes = self.buffer.len(), output = %self.output.display(), "Reception complete");
        Err(ReceiverError::TransferComplete)
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<WaitSize> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let Some(payload) = fsm.next_payload()? else {
            return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
        };

        if payload.len() < SIZE_FIELD {
            tracing::warn!(payload = %hex(&payload), "Size announcement too short, ignoring");
            return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
        }

        let size = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        fsm.total = size as usize;
        // Grows per chunk; the announced size is not trusted for allocation.
        fsm.buffer = Vec::new();
        fsm.received = 0;
        tracing::info!(size, "Received: size");

        fsm.reply(SIZE_ACK)?;

        if fsm.total == 0 {
            return fsm.finish();
        }

        let next = fsm.transition::<ReceiveChunks>();
        Ok(next as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<ReceiveChunks> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let Some(payload) = fsm.next_payload()? else {
            return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
        };

        match verify_chunk(&payload) {
            Ok(chunk) => {
                fsm.buffer.truncate(fsm.received);
                fsm.buffer.try_reserve(chunk.len())
                    .map_err(|_| ReceiverError::OutOfMemory(fsm.received + chunk.len()))?;
                fsm.buffer.extend_from_slice(chunk);
                fsm.received += chunk.len();
                tracing::debug!(len = chunk.len(), received = fsm.received, total = fsm.total, "Received: chunk");
                fsm.reply(ACK)?;
            }
            Err(mismatch) => {
                tracing::warn!(
                    expected = ?mismatch.expected,
                    actual = mismatch.actual,
                    len = payload.len(),
                    "Chunk checksum mismatch"
                );
                // The device starts over from the beginning of its buffer.
                fsm.received = 0;
                fsm.reply(ERR)?;
            }
        }

        if fsm.received >= fsm.total {
            return fsm.finish();
        }
        Ok(Box::new(fsm) as Box<dyn ReceiverState>)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl ReceiverFsm<WaitSize> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        output: PathBuf,
        gate: TransportGate,
        shutdown: Shutdown,
    ) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<WaitSize>,
            link: Link::new(serial),
            gate,
            shutdown,
            output,
            total: 0,
            buffer: Vec::new(),
            received: 0,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{SenderError, SenderFsm, SenderState, TransferConfig};
    use crate::serial::{frame_responses, pipe_pair, MockSerialPort};

    fn run_receiver(mut fsm: Box<dyn ReceiverState>) -> Result<(), ReceiverError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(ReceiverError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn replies(tokens: &[&[u8]]) -> Vec<u8> {
        tokens.iter().flat_map(|t| frame(t)).collect()
    }

    fn receiver(responses: Vec<Option<u8>>, expected_writes: Vec<u8>, output: &std::path::Path) -> Box<dyn ReceiverState> {
        let serial = Box::new(MockSerialPort::new(responses, expected_writes));
        ReceiverFsm::new(serial, output.to_path_buf(), TransportGate::default(), Shutdown::new())
    }

    #[test]
    fn test_receiver_full_transfer() {
        let output = std::env::temp_dir().join("receiver_full.bin");
        let data: Vec<u8> = (0..600).map(|i| (i % 256) as u8).collect();

        let size = size_payload(600);
        let chunks: Vec<Vec<u8>> = data.chunks(250).map(chunk_payload).collect();
        let responses = frame_responses(&[&size[..], &chunks[0][..], &chunks[1][..], &chunks[2][..]]);

        let fsm = receiver(responses, replies(&[SIZE_ACK, ACK, ACK, ACK]), &output);
        run_receiver(fsm).expect("Reception should complete");

        assert_eq!(std::fs::read(&output).unwrap(), data);
        std::fs::remove_file(&output).ok();
    }

    #[test]
    fn test_receiver_bad_checksum() {
        let output = std::env::temp_dir().join("receiver_badcrc.bin");
        let good = chunk_payload(b"0123456789");
        let mut bad = good.clone();
        bad[3] ^= 0x40;

        let size = size_payload(10);
        let responses = frame_responses(&[&size[..], &bad[..], &good[..]]);

        let fsm = receiver(responses, replies(&[SIZE_ACK, ERR, ACK]), &output);
        run_receiver(fsm).unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"0123456789");
        std::fs::remove_file(&output).ok();
    }

    #[test]
    fn test_receiver_empty_file() {
        let output = std::env::temp_dir().join("receiver_empty.bin");
        let size = size_payload(0);

        let fsm = receiver(frame_responses(&[&size[..]]), replies(&[SIZE_ACK]), &output);
        run_receiver(fsm).unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"");
        std::fs::remove_file(&output).ok();
    }

    #[test]
    fn test_receiver_ignores_short_size_frame() {
        let output = std::env::temp_dir().join("receiver_short.bin");
        let size = size_payload(3);
        let chunk = chunk_payload(b"abc");

        let responses = frame_responses(&[&b"\x01\x02"[..], &size[..], &chunk[..]]);
        let fsm = receiver(responses, replies(&[SIZE_ACK, ACK]), &output);
        run_receiver(fsm).unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"abc");
        std::fs::remove_file(&output).ok();
    }

    #[test]
    fn test_receiver_rejects_frame_without_checksum() {
        let output = std::env::temp_dir().join("receiver_nocrc.bin");
        let size = size_payload(3);
        let chunk = chunk_payload(b"abc");

        let responses = frame_responses(&[&size[..], &b"ab"[..], &chunk[..]]);
        let fsm = receiver(responses, replies(&[SIZE_ACK, ERR, ACK]), &output);
        run_receiver(fsm).unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"abc");
        std::fs::remove_file(&output).ok();
    }

    #[test]
    fn test_receiver_huge_size_announcement() {
        let output = std::env::temp_dir().join("receiver_huge.bin");
        std::fs::remove_file(&output).ok();
        let size = size_payload(u32::MAX);
        let chunk = chunk_payload(b"abc");

        let responses = frame_responses(&[&size[..], &chunk[..]]);
        let mut fsm = receiver(responses, replies(&[SIZE_ACK, ACK]), &output);

        // Size frame, separator timeout, first chunk
        for _ in 0..3 {
            fsm = fsm.step().expect("Should succeed");
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_receiver_cancelled() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let serial = Box::new(MockSerialPort::new(vec![], vec![]));
        let fsm = ReceiverFsm::new(serial, PathBuf::from("unused.bin"), TransportGate::default(), shutdown);

        assert!(matches!(fsm.step(), Err(ReceiverError::Cancelled)));
    }

    fn loopback(data: Vec<u8>, frame_size: usize, output: &std::path::Path) {
        let (host, device) = pipe_pair();
        let device_fsm = ReceiverFsm::new(Box::new(device), output.to_path_buf(), TransportGate::default(), Shutdown::new());
        let device_thread = std::thread::spawn(move || run_receiver(device_fsm));

        let config = TransferConfig { frame_size, poll_interval: Duration::from_millis(1) };
        let mut fsm: Box<dyn SenderState> = SenderFsm::new(Box::new(host), data, config, Shutdown::new()).unwrap();
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(SenderError::TransferComplete) => break,
                Err(e) => panic!("Send failed: {:?}", e),
            }
        }

        device_thread.join().unwrap().expect("Reception should complete");
    }

    #[test]
    fn test_sender_to_receiver_loopback() {
        let output = std::env::temp_dir().join("loopback_600.bin");
        let data: Vec<u8> = (0..600u32).map(|i| (i * 7 % 256) as u8).collect();

        loopback(data.clone(), 256, &output);
        assert_eq!(std::fs::read(&output).unwrap(), data);

        loopback(data.clone(), 253, &output);
        assert_eq!(std::fs::read(&output).unwrap(), data);

        std::fs::remove_file(&output).ok();
    }

    #[test]
    fn test_sender_to_receiver_loopback_empty() {
        let output = std::env::temp_dir().join("loopback_empty.bin");
        loopback(Vec::new(), 256, &output);
        assert_eq!(std::fs::read(&output).unwrap(), b"");
        std::fs::remove_file(&output).ok();
    }
}
