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

//! File transfer to a remote device over a serial link.
//!
//! Every frame is COBS encoded and terminated by a zero byte. The sender
//! announces the file size, then sends one chunk at a time with a trailing
//! CRC-32, waiting for `SIZE_ACK` and `ACK` replies before moving on.

pub mod cobs;
pub mod decoder;
pub mod gate;
pub mod link;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod serial;
