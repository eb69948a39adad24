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
use std::time::Duration;
use thiserror::Error;
use crate::gate::{GateError, Shutdown, TransportGate, DEFAULT_POLL_INTERVAL};
use crate::link::Link;
use crate::protocol::*;
use crate::serial::SerialPort;

/// Read timeout while waiting for a reply. Waiting itself is unbounded;
/// this only sets how often shutdown is checked.
const ACK_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is {0} bytes, too large for a 32-bit size announcement")]
    FileTooLarge(usize),

    #[error("frame size {0} leaves no room for chunk data")]
    FrameSizeTooSmall(usize),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("Transfer complete")]
    TransferComplete,
}

impl From<GateError> for SenderError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Io(e) => SenderError::Io(e),
            GateError::Cancelled => SenderError::Cancelled,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Target size of a chunk frame on the wire, delimiter included
    pub frame_size: usize,
    /// Transport Gate poll interval
    pub poll_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            frame_size: DEFAULT_FRAME_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// ============================================================================
// Transfer State
// ============================================================================

/// File content and send cursor.
///
/// `offset` moves in whole `capacity` steps, so after the last (short) chunk
/// it can run past the end of `data`. It is only ever compared against the
/// length; use [`Transfer::sent`] for the number of bytes actually sent.
pub struct Transfer {
    data: Vec<u8>,
    offset: usize,
    capacity: usize,
}

impl Transfer {
    pub fn new(data: Vec<u8>, capacity: usize) -> Self {
        Transfer { data, offset: 0, capacity }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn sent(&self) -> usize {
        self.offset.min(self.data.len())
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Slice the next chunk and advance the cursor by a full capacity.
    fn next_chunk(&mut self) -> Option<(usize, &[u8])> {
        if self.is_exhausted() {
            return None;
        }
        let start = self.offset;
        let end = std::cmp::min(start + self.capacity, self.data.len());
        self.offset += self.capacity;
        Some((start, &self.data[start..end]))
    }
}

fn announced_size(len: usize) -> Result<u32, SenderError> {
    u32::try_from(len).map_err(|_| SenderError::FileTooLarge(len))
}

// ============================================================================
// Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AnnouncingSize,
    AwaitingSizeAck,
    SendingChunk,
    AwaitingChunkAck,
    Done,
}

impl Phase {
    /// Reply that moves this phase forward, if it waits on one.
    pub fn expected_ack(self) -> Option<&'static [u8]> {
        match self {
            Phase::AwaitingSizeAck => Some(SIZE_ACK),
            Phase::AwaitingChunkAck => Some(ACK),
            _ => None,
        }
    }

    pub fn accepts(self, payload: &[u8]) -> bool {
        self.expected_ack() == Some(payload)
    }
}

// ============================================================================
// States
// ============================================================================

pub struct Idle;
pub struct AnnounceSize;
pub struct AwaitSizeAck;
pub struct SendChunk;
pub struct AwaitChunkAck;
pub struct Done;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    link: Link,
    gate: TransportGate,
    shutdown: Shutdown,
    transfer: Transfer,
    chunks_sent: usize,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError>;

    fn phase(&self) -> Phase;

    fn transfer(&self) -> &Transfer;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            link: self.link,
            gate: self.gate,
            shutdown: self.shutdown,
            transfer: self.transfer,
            chunks_sent: self.chunks_sent,
        })
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn write_frame(&mut self, payload: &[u8]) -> Result<usize, SenderError> {
        self.gate.acquire(self.link.serial(), &self.shutdown)?;
        self.link.send_frame(payload).map_err(|e| self.io_error(e))
    }

    /// Wait for one reply and report whether it is the one `phase` expects.
    fn await_ack(&mut self, phase: Phase) -> Result<bool, SenderError> {
        if self.shutdown.is_triggered() {
            return Err(SenderError::Cancelled);
        }

        match self.link.next_frame(ACK_POLL).map_err(|e| self.io_error(e))? {
            Some(Ok(payload)) if phase.accepts(&payload) => {
                tracing::debug!(response = %String::from_utf8_lossy(&payload), "Received");
                Ok(true)
            }
            Some(Ok(payload)) => {
                tracing::warn!(
                    state = ?phase,
                    response = %String::from_utf8_lossy(&payload),
                    "Unknown response"
                );
                Ok(false)
            }
            Some(Err(e)) => {
                tracing::warn!(state = ?phase, error = %e, "Dropping undecodable frame");
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<Idle> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let fsm = *self;
        tracing::info!(
            len = fsm.transfer.len(),
            capacity = fsm.transfer.capacity(),
            "Starting transfer"
        );
        let next = fsm.transition::<AnnounceSize>();
        Ok(next as Box<dyn SenderState>)
    }

    fn phase(&self) -> Phase { Phase::Idle }

    fn transfer(&self) -> &Transfer { &self.transfer }
}

impl SenderState for SenderFsm<AnnounceSize> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        let size = announced_size(fsm.transfer.len())?;
        let payload = size_payload(size);
        fsm.write_frame(&payload)?;
        tracing::info!(size, payload = %hex(&payload), "Sent: size");
        let next = fsm.transition::<AwaitSizeAck>();
        Ok(next as Box<dyn SenderState>)
    }

    fn phase(&self) -> Phase { Phase::AnnouncingSize }

    fn transfer(&self) -> &Transfer { &self.transfer }
}

impl SenderState for SenderFsm<AwaitSizeAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        if fsm.await_ack(Phase::AwaitingSizeAck)? {
            let next = fsm.transition::<SendChunk>();
            Ok(next as Box<dyn SenderState>)
        } else {
            Ok(Box::new(fsm) as Box<dyn SenderState>)
        }
    }

    fn phase(&self) -> Phase { Phase::AwaitingSizeAck }

    fn transfer(&self) -> &Transfer { &self.transfer }
}

impl SenderState for SenderFsm<SendChunk> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let chunk = fsm.transfer.next_chunk().map(|(start, chunk)| (start, chunk.len(), chunk_payload(chunk)));
        let Some((start, len, payload)) = chunk else {
            tracing::info!(chunks = fsm.chunks_sent, bytes = fsm.transfer.sent(), "All data sent");
            let next = fsm.transition::<Done>();
            return Ok(next as Box<dyn SenderState>);
        };

        let wire_len = fsm.write_frame(&payload)?;
        fsm.chunks_sent += 1;
        tracing::debug!(
            offset = start,
            len,
            wire_len,
            crc = %hex(&payload[len..]),
            "Sent: chunk"
        );

        let next = fsm.transition::<AwaitChunkAck>();
        Ok(next as Box<dyn SenderState>)
    }

    fn phase(&self) -> Phase { Phase::SendingChunk }

    fn transfer(&self) -> &Transfer { &self.transfer }
}

impl SenderState for SenderFsm<AwaitChunkAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        if fsm.await_ack(Phase::AwaitingChunkAck)? {
            tracing::info!(sent = fsm.transfer.sent(), total = fsm.transfer.len(), "Chunk acknowledged");
            let next = fsm.transition::<SendChunk>();
            Ok(next as Box<dyn SenderState>)
        } else {
            Ok(Box::new(fsm) as Box<dyn SenderState>)
        }
    }

    fn phase(&self) -> Phase { Phase::AwaitingChunkAck }

    fn transfer(&self) -> &Transfer { &self.transfer }
}

impl SenderState for SenderFsm<Done> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        Err(SenderError::TransferComplete)
    }

    fn phase(&self) -> Phase { Phase::Done }

    fn transfer(&self) -> &Transfer { &self.transfer }
}

// ============================================================================
// Constructor
// ============================================================================

impl SenderFsm<Idle> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        data: Vec<u8>,
        config: TransferConfig,
        shutdown: Shutdown,
    ) -> Result<Box<dyn SenderState>, SenderError> {
        let capacity = chunk_capacity(config.frame_size)
            .ok_or(SenderError::FrameSizeTooSmall(config.frame_size))?;
        announced_size(data.len())?;

        Ok(Box::new(SenderFsm {
            state: PhantomData::<Idle>,
            link: Link::new(serial),
            gate: TransportGate::new(config.poll_interval),
            shutdown,
            transfer: Transfer::new(data, capacity),
            chunks_sent: 0,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
