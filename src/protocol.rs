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

//! Wire protocol constants and frame builders

use crate::cobs;

/// Frame terminator; never appears inside an encoded payload
pub const DELIMITER: u8 = 0x00;

/// Receiver accepted the size announcement
pub const SIZE_ACK: &[u8] = b"SIZE_ACK";

/// Receiver accepted a chunk
pub const ACK: &[u8] = b"ACK";

/// Receiver rejected a chunk (checksum mismatch); the sender does not act on it
pub const ERR: &[u8] = b"ERR";

/// Trailing CRC-32 on every chunk
pub const CRC_SIZE: usize = 4;

/// Size announcement payload: little-endian u32
pub const SIZE_FIELD: usize = 4;

pub const DELIMITER_SIZE: usize = 1;

/// COBS header byte
pub const COBS_OVERHEAD: usize = 1;

pub const DEFAULT_FRAME_SIZE: usize = 256;

pub const DEFAULT_BAUD: u32 = 115_200;

/// Raw chunk bytes that fit in a frame of `frame_size` bytes on the wire.
pub fn chunk_capacity(frame_size: usize) -> Option<usize> {
    frame_size
        .checked_sub(CRC_SIZE + DELIMITER_SIZE + COBS_OVERHEAD)
        .filter(|&capacity| capacity > 0)
}

/// Encode `payload` and terminate it with the delimiter.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = cobs::encode(payload);
    out.push(DELIMITER);
    out
}

pub fn size_payload(len: u32) -> [u8; SIZE_FIELD] {
    len.to_le_bytes()
}

/// Chunk bytes followed by their little-endian CRC-32.
pub fn chunk_payload(chunk: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(chunk.len() + CRC_SIZE);
    payload.extend_from_slice(chunk);
    payload.extend_from_slice(&crc32fast::hash(chunk).to_le_bytes());
    payload
}

/// Split a chunk payload into data and checksum, checking the checksum.
pub fn verify_chunk(payload: &[u8]) -> Result<&[u8], ChecksumMismatch> {
    if payload.len() < CRC_SIZE {
        return Err(ChecksumMismatch { expected: None, actual: 0 });
    }
    let (data, trailer) = payload.split_at(payload.len() - CRC_SIZE);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(data);
    if expected == actual {
        Ok(data)
    } else {
        Err(ChecksumMismatch { expected: Some(expected), actual })
    }
}

/// `expected` is `None` when the frame was too short to carry a checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumMismatch {
    pub expected: Option<u32>,
    pub actual: u32,
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_capacity() {
        assert_eq!(chunk_capacity(256), Some(250));
        assert_eq!(chunk_capacity(253), Some(247));
        assert_eq!(chunk_capacity(7), Some(1));
        assert_eq!(chunk_capacity(6), None);
        assert_eq!(chunk_capacity(0), None);
    }

    #[test]
    fn test_crc_matches_zlib() {
        // Standard CRC-32 check value
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF4_3926);

        let payload = chunk_payload(b"123456789");
        assert_eq!(&payload[..9], b"123456789");
        assert_eq!(&payload[9..], &[0x26, 0x39, 0xF4, 0xCB]);
    }

    #[test]
    fn test_verify_chunk() {
        let payload = chunk_payload(b"hello");
        assert_eq!(verify_chunk(&payload), Ok(&b"hello"[..]));

        let mut corrupted = payload.clone();
        corrupted[0] ^= 0xFF;
        assert!(matches!(verify_chunk(&corrupted), Err(ChecksumMismatch { expected: Some(_), .. })));

        assert_eq!(verify_chunk(b"abc"), Err(ChecksumMismatch { expected: None, actual: 0 }));
        assert_eq!(verify_chunk(&chunk_payload(b"")), Ok(&b""[..]));
    }

    #[test]
    fn test_size_frame() {
        assert_eq!(size_payload(600), [0x58, 0x02, 0x00, 0x00]);
        assert_eq!(frame(&size_payload(600)), vec![0x03, 0x58, 0x02, 0x01, 0x01, 0x00]);
        assert_eq!(frame(&size_payload(0)), vec![0x01, 0x01, 0x01, 0x01, 0x01, 0x00]);
    }
}
