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

//! Framed view of a serial transport

use std::collections::VecDeque;
use std::time::Duration;
use crate::decoder::{FrameDecoder, FrameResult};
use crate::protocol::{frame, hex};
use crate::serial::SerialPort;

const READ_CHUNK: usize = 256;

pub struct Link {
    serial: Box<dyn SerialPort>,
    decoder: FrameDecoder,
    pending: VecDeque<FrameResult>,
}

impl Link {
    pub fn new(serial: Box<dyn SerialPort>) -> Self {
        Link {
            serial,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn serial(&mut self) -> &mut dyn SerialPort {
        self.serial.as_mut()
    }

    /// Encode, terminate and write one frame.
    pub fn send_frame(&mut self, payload: &[u8]) -> std::io::Result<usize> {
        let wire = frame(payload);
        tracing::trace!(payload = %hex(payload), wire = %hex(&wire), "frame out");
        self.serial.write_all(&wire)?;
        Ok(wire.len())
    }

    /// Next decoded frame from the peer.
    ///
    /// Reads at most once, so `Ok(None)` means nothing complete arrived
    /// within `timeout`. A decode failure is returned for that frame only.
    pub fn next_frame(&mut self, timeout: Duration) -> std::io::Result<Option<FrameResult>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        let mut buf = [0u8; READ_CHUNK];
        let n = match self.serial.read_timeout(&mut buf, timeout) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(e),
        };

        if n == 0 {
            // End of stream: whatever is still buffered is the last frame.
            return match self.decoder.finish() {
                Some(frame) => Ok(Some(frame)),
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "transport closed",
                )),
            };
        }

        tracing::trace!(bytes = %hex(&buf[..n]), "read");
        self.pending.extend(self.decoder.push(&buf[..n]));
        Ok(self.pending.pop_front())
    }
}
