// MonLink - Bare-Metal Debug Monitor
// Copyright (C) 2026 MonLink Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Host-side library for driving a MonLink monitor over a serial link:
//! a transaction [`Client`], the [`Connection`] seam it runs on, ELF image
//! upload/launch helpers, and YAML link profiles.

use monlink_wire::ErrorCode;

pub mod client;
pub mod connection;
pub mod image;
pub mod profile;

pub use client::Client;
pub use connection::{Connection, SerialConnection};
pub use image::{load_elf, ProgramImage, Segment};
pub use profile::LinkProfile;

/// Everything that can go wrong in a host-side transaction.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to open serial port: {0}")]
    Serial(#[from] serialport::Error),
    #[error("invalid CRC in reply")]
    ReplyCrc,
    #[error("target reported: {0}")]
    Target(ErrorCode),
    #[error("target reported unknown error code {0:#06x}")]
    UnknownErrorCode(u16),
    #[error("unexpected reply command {actual:#06x} (expected {expected:#06x})")]
    UnexpectedReply { expected: u16, actual: u16 },
    #[error("truncated reply")]
    Truncated,
    #[error("reply {0} does not match the request")]
    EchoMismatch(&'static str),
}
