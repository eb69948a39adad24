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

//! Consistent Overhead Byte Stuffing
//!
//! Encoded data never contains `0x00`, so a single zero byte can terminate
//! every frame on the wire.

use thiserror::Error;

/// Longest run a single code byte can describe.
const MAX_RUN: usize = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("zero byte inside encoded frame at position {position}")]
    ZeroByte { position: usize },

    #[error("code byte 0x{code:02X} at position {position} overruns frame ({available} bytes left)")]
    Overrun { position: usize, code: u8, available: usize },

    #[error("frame longer than {limit} bytes, dropped")]
    Oversized { limit: usize },
}

/// Upper bound on the encoded size of an `len` byte payload.
pub fn max_encoded_len(len: usize) -> usize {
    len + len / (MAX_RUN - 1) + 1
}

pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(max_encoded_len(data.len()));
    let mut code_idx = 0;
    let mut code: u8 = 1;
    out.push(0);

    for &byte in data {
        // A full run carries no implicit zero, so the next byte always
        // opens a fresh block.
        if code as usize == MAX_RUN {
            out[code_idx] = code;
            code_idx = out.len();
            out.push(0);
            code = 1;
        }

        if byte == 0 {
            out[code_idx] = code;
            code_idx = out.len();
            out.push(0);
            code = 1;
        } else {
            out.push(byte);
            code += 1;
        }
    }

    out[code_idx] = code;
    out
}

pub fn decode(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(data.len());
    let mut pos = 0;

    while pos < data.len() {
        let code = data[pos];
        if code == 0 {
            return Err(DecodeError::ZeroByte { position: pos });
        }

        let run = code as usize - 1;
        let available = data.len() - pos - 1;
        if run > available {
            return Err(DecodeError::Overrun { position: pos, code, available });
        }

        let block = &data[pos + 1..pos + 1 + run];
        if let Some(offset) = block.iter().position(|&b| b == 0) {
            return Err(DecodeError::ZeroByte { position: pos + 1 + offset });
        }
        out.extend_from_slice(block);
        pos += 1 + run;

        if (code as usize) < MAX_RUN && pos < data.len() {
            out.push(0);
        }
    }

    Ok(out)
}
