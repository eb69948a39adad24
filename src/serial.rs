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

use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

/// Driver output queue depth above which the port is reported busy.
const OUTPUT_HIGH_WATER: u32 = 4096;

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte transport carrying the framed protocol
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Whether a write would be accepted right now.
    fn writable(&mut self) -> std::io::Result<bool> {
        Ok(true)
    }

    /// Block until the port is writable or `timeout` elapses.
    ///
    /// Transports with a readiness notification should override this and
    /// wait on it; the default checks once and sleeps out the interval.
    fn wait_writable(&mut self, timeout: Duration) -> std::io::Result<bool> {
        if self.writable()? {
            return Ok(true);
        }
        std::thread::sleep(timeout);
        Ok(false)
    }
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        // Stale bytes from an earlier session would be taken for replies.
        port.clear(serialport::ClearBuffer::Input)?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.port.read(buf)
    }

    fn writable(&mut self) -> std::io::Result<bool> {
        let pending = self.port.bytes_to_write()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(pending < OUTPUT_HIGH_WATER)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Once reads are exhausted, report end of stream instead of timing out
    end_of_stream: bool,
    // Number of writability checks that report busy before the port frees up
    busy_polls: usize,
    polls: usize,
    // Track what was written
    write_log: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            end_of_stream: false,
            busy_polls: 0,
            polls: 0,
            write_log: Default::default(),
            expected_writes,
        }
    }

    pub fn with_busy_polls(mut self, busy_polls: usize) -> Self {
        self.busy_polls = busy_polls;
        self
    }

    pub fn with_end_of_stream(mut self) -> Self {
        self.end_of_stream = true;
        self
    }

    /// Shared view of everything written so far.
    pub fn write_log(&self) -> std::sync::Arc<std::sync::Mutex<Vec<u8>>> {
        self.write_log.clone()
    }
}

/// Script a sequence of frames as mock read responses, with a read timeout
/// between consecutive frames so each arrives on its own read.
#[cfg(test)]
pub fn frame_responses(payloads: &[&[u8]]) -> Vec<Option<u8>> {
    let mut responses = Vec::new();
    for (i, payload) in payloads.iter().enumerate() {
        if i > 0 {
            responses.push(None);
        }
        responses.extend(crate::protocol::frame(payload).into_iter().map(Some));
    }
    responses
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.lock().unwrap().extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            if self.end_of_stream {
                return Ok(0);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,  // Stop at timeout marker
            }
        }

        Ok(bytes_read)
    }

    fn writable(&mut self) -> std::io::Result<bool> {
        self.polls += 1;
        Ok(self.polls > self.busy_polls)
    }

    fn wait_writable(&mut self, _timeout: Duration) -> std::io::Result<bool> {
        self.writable()
    }
}

/// One end of an in-memory duplex link
#[cfg(test)]
pub struct PipePort {
    tx: std::sync::mpsc::Sender<Vec<u8>>,
    rx: std::sync::mpsc::Receiver<Vec<u8>>,
    leftover: Vec<u8>,
}

/// Two connected ports: whatever one writes, the other reads.
#[cfg(test)]
pub fn pipe_pair() -> (PipePort, PipePort) {
    let (a_tx, b_rx) = std::sync::mpsc::channel();
    let (b_tx, a_rx) = std::sync::mpsc::channel();
    (
        PipePort { tx: a_tx, rx: a_rx, leftover: Vec::new() },
        PipePort { tx: b_tx, rx: b_rx, leftover: Vec::new() },
    )
}

#[cfg(test)]
impl SerialPort for PipePort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.tx.send(buf.to_vec())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone"))
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        if self.leftover.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(bytes) => self.leftover = bytes,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "Pipe timeout"));
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover = self.leftover.split_off(n);
        Ok(n)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        let write_log = self.write_log.lock().unwrap();
        assert_eq!(
            &*write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            write_log.len(),
            *write_log
        );
    }
}
