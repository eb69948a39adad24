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

//! Streaming frame splitter.
//!
//! Incoming bytes arrive in arbitrary fragments. The decoder keeps whatever
//! follows the last delimiter as carry-over and hands out one decoded
//! payload per delimiter found.

use bytes::{Buf, BytesMut};

use crate::cobs::{self, DecodeError};
use crate::protocol::DELIMITER;

pub type FrameResult = Result<Vec<u8>, DecodeError>;

/// Longest encoded frame kept while waiting for its delimiter.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

pub struct FrameDecoder {
    carry: BytesMut,
    max_frame: usize,
    // Inside an oversized frame: drop bytes up to the next delimiter
    discarding: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        FrameDecoder {
            carry: BytesMut::with_capacity(1024),
            max_frame,
            discarding: false,
        }
    }

    /// Append `data` to the carry-over and iterate over every frame it
    /// completes.
    ///
    /// The iterator is lazy: frames not pulled before it is dropped stay
    /// buffered and come out first on the next call. A frame that grows
    /// past the size limit is reported once as `Oversized` and its bytes
    /// are dropped up to the next delimiter.
    pub fn push(&mut self, data: &[u8]) -> Frames<'_> {
        self.carry.extend_from_slice(data);
        Frames { decoder: self }
    }

    /// Flush the carry-over at end of stream as one last frame, even though
    /// its delimiter never arrived.
    pub fn finish(&mut self) -> Option<FrameResult> {
        let rest = self.carry.split();
        if std::mem::take(&mut self.discarding) || rest.is_empty() {
            return None;
        }
        Some(cobs::decode(&rest))
    }

    /// Bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.carry.len()
    }

    fn next_frame(&mut self) -> Option<FrameResult> {
        loop {
            let Some(end) = self.carry.iter().position(|&b| b == DELIMITER) else {
                if self.discarding {
                    self.carry.clear();
                } else if self.carry.len() > self.max_frame {
                    self.carry.clear();
                    self.discarding = true;
                    return Some(self.oversized());
                }
                return None;
            };

            if self.discarding {
                self.carry.advance(end + 1);
                self.discarding = false;
                continue;
            }

            if end > self.max_frame {
                self.carry.advance(end + 1);
                return Some(self.oversized());
            }

            // The carry-over moves past this frame before it is decoded, so a
            // corrupt frame cannot desynchronise the ones after it.
            let encoded = self.carry.split_to(end);
            self.carry.advance(1);
            return Some(cobs::decode(&encoded));
        }
    }

    fn oversized(&self) -> FrameResult {
        tracing::warn!(limit = self.max_frame, "Dropping oversized frame");
        Err(DecodeError::Oversized { limit: self.max_frame })
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = FrameResult;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame;

    fn stream(payloads: &[&[u8]]) -> Vec<u8> {
        payloads.iter().flat_map(|p| frame(p)).collect()
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = FrameDecoder::new();
        let frames: Vec<_> = decoder.push(&frame(b"SIZE_ACK")).collect();
        assert_eq!(frames, vec![Ok(b"SIZE_ACK".to_vec())]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_split_invariance() {
        let payloads: Vec<Vec<u8>> = vec![
            b"SIZE_ACK".to_vec(),
            vec![],
            b"ACK".to_vec(),
            vec![0, 0, 1, 0],
            (0..600).map(|i| (i % 256) as u8).collect(),
            b"ACK".to_vec(),
        ];
        let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let wire = stream(&refs);

        let mut whole = FrameDecoder::new();
        let all_at_once: Vec<_> = whole.push(&wire).collect();

        let mut bytewise = FrameDecoder::new();
        let mut one_at_a_time = Vec::new();
        for b in &wire {
            one_at_a_time.extend(bytewise.push(&[*b]));
        }

        let mut uneven = FrameDecoder::new();
        let mut in_chunks = Vec::new();
        for piece in wire.chunks(7) {
            in_chunks.extend(uneven.push(piece));
        }

        let expected: Vec<FrameResult> = payloads.into_iter().map(Ok).collect();
        assert_eq!(all_at_once, expected);
        assert_eq!(one_at_a_time, expected);
        assert_eq!(in_chunks, expected);
    }

    #[test]
    fn test_adjacent_delimiters_yield_empty_payload() {
        let mut decoder = FrameDecoder::new();
        let frames: Vec<_> = decoder.push(&[0x04, b'A', b'C', b'K', 0x00, 0x00]).collect();
        assert_eq!(frames, vec![Ok(b"ACK".to_vec()), Ok(vec![])]);
    }

    #[test]
    fn test_partial_frame_is_carried_over() {
        let wire = frame(b"ACK");
        let mut decoder = FrameDecoder::new();

        assert_eq!(decoder.push(&wire[..2]).count(), 0);
        assert_eq!(decoder.buffered(), 2);

        let frames: Vec<_> = decoder.push(&wire[2..]).collect();
        assert_eq!(frames, vec![Ok(b"ACK".to_vec())]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_bad_frame_does_not_block_following_frames() {
        let mut wire = vec![0x05, 0x11, 0x00];
        wire.extend(frame(b"ACK"));

        let mut decoder = FrameDecoder::new();
        let frames: Vec<_> = decoder.push(&wire).collect();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(DecodeError::Overrun { .. })));
        assert_eq!(frames[1], Ok(b"ACK".to_vec()));
    }

    #[test]
    fn test_finish_flushes_trailing_bytes() {
        let mut decoder = FrameDecoder::new();
        let mut wire = frame(b"ACK");
        wire.extend(cobs::encode(b"SIZE_ACK"));

        let frames: Vec<_> = decoder.push(&wire).collect();
        assert_eq!(frames, vec![Ok(b"ACK".to_vec())]);
        assert_eq!(decoder.finish(), Some(Ok(b"SIZE_ACK".to_vec())));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_dropped_iterator_keeps_remaining_frames() {
        let mut decoder = FrameDecoder::new();
        let wire = stream(&[&b"one"[..], &b"two"[..], &b"three"[..]]);

        let first = decoder.push(&wire).next();
        assert_eq!(first, Some(Ok(b"one".to_vec())));

        let rest: Vec<_> = decoder.push(&[]).collect();
        assert_eq!(rest, vec![Ok(b"two".to_vec()), Ok(b"three".to_vec())]);
    }

    #[test]
    fn test_line_noise_is_bounded() {
        let noise = vec![0x55u8; 40];
        let mut wire = noise.clone();
        wire.push(DELIMITER);
        wire.extend(frame(b"ACK"));

        let mut whole = FrameDecoder::with_max_frame(16);
        let all_at_once: Vec<_> = whole.push(&wire).collect();

        let mut bytewise = FrameDecoder::with_max_frame(16);
        let mut one_at_a_time = Vec::new();
        for b in &wire {
            one_at_a_time.extend(bytewise.push(&[*b]));
            assert!(bytewise.buffered() <= 17);
        }

        let expected = vec![Err(DecodeError::Oversized { limit: 16 }), Ok(b"ACK".to_vec())];
        assert_eq!(all_at_once, expected);
        assert_eq!(one_at_a_time, expected);
    }

    #[test]
    fn test_noise_without_delimiter_is_dropped() {
        let mut decoder = FrameDecoder::with_max_frame(16);
        let frames: Vec<_> = decoder.push(&[0x55; 100]).collect();
        assert_eq!(frames, vec![Err(DecodeError::Oversized { limit: 16 })]);
        assert_eq!(decoder.buffered(), 0);

        assert_eq!(decoder.push(&[0x55; 100]).count(), 0);
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.finish(), None);

        let frames: Vec<_> = decoder.push(&frame(b"ACK")).collect();
        assert_eq!(frames, vec![Ok(b"ACK".to_vec())]);
    }
}
