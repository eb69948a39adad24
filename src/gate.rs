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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use crate::serial::SerialPort;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum GateError {
    #[error("writability check failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled while waiting for transport")]
    Cancelled,
}

// ============================================================================
// Shutdown
// ============================================================================

/// Cancellation handle shared between a running transfer and its owner
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Transport Gate
// ============================================================================

/// Holds the caller until the transport will accept a write
#[derive(Debug, Clone, Copy)]
pub struct TransportGate {
    interval: Duration,
}

impl TransportGate {
    pub fn new(interval: Duration) -> Self {
        TransportGate { interval }
    }

    /// Wait, without bound, until `serial` is writable.
    ///
    /// Each wait lasts at most one interval so a shutdown is noticed
    /// promptly.
    pub fn acquire(&self, serial: &mut dyn SerialPort, shutdown: &Shutdown) -> Result<(), GateError> {
        let mut waits = 0u32;
        loop {
            if shutdown.is_triggered() {
                return Err(GateError::Cancelled);
            }
            if serial.wait_writable(self.interval)? {
                if waits > 0 {
                    tracing::debug!(waits, "transport writable");
                }
                return Ok(());
            }
            waits = waits.saturating_add(1);
            tracing::trace!(waits, "transport busy");
        }
    }
}

impl Default for TransportGate {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;

    #[test]
    fn test_gate_open_port() {
        let mut serial = MockSerialPort::new(vec![], vec![]);
        TransportGate::default().acquire(&mut serial, &Shutdown::new()).unwrap();
    }

    #[test]
    fn test_gate_waits_for_busy_port() {
        let mut serial = MockSerialPort::new(vec![], vec![]).with_busy_polls(5);
        TransportGate::new(Duration::from_millis(1)).acquire(&mut serial, &Shutdown::new()).unwrap();
        assert!(serial.writable().unwrap());
    }

    #[test]
    fn test_gate_cancelled() {
        let mut serial = MockSerialPort::new(vec![], vec![]).with_busy_polls(usize::MAX);
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let result = TransportGate::default().acquire(&mut serial, &shutdown);
        assert!(matches!(result, Err(GateError::Cancelled)));
    }

    #[test]
    fn test_default_wait_sleeps_out_interval() {
        struct Busy;
        impl SerialPort for Busy {
            fn write_all(&mut self, _buf: &[u8]) -> std::io::Result<()> { Ok(()) }
            fn read_timeout(&mut self, _buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> { Ok(0) }
            fn writable(&mut self) -> std::io::Result<bool> { Ok(false) }
        }

        let start = std::time::Instant::now();
        assert!(!Busy.wait_writable(Duration::from_millis(20)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
