// MonLink - Bare-Metal Debug Monitor
// Copyright (C) 2026 MonLink Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Request/response client for the monitor protocol.
//!
//! Each operation is one transaction: build a request frame, send it, read
//! back either the echoed command with its fixed-size payload or an error
//! frame. Echoed address/length fields are cross-checked against the
//! request; a mismatch means the stream is talking about a different
//! transaction than we are.

use tracing::debug;

use monlink_wire::{Command, ErrorCode, Packet, ERROR_REPLY};

use crate::connection::Connection;
use crate::ProtocolError;

pub struct Client<C: Connection> {
    connection: C,
}

impl<C: Connection> Client<C> {
    pub fn new(connection: C) -> Self {
        Self { connection }
    }

    /// Queries the protocol revision.
    pub fn version(&mut self) -> Result<u16, ProtocolError> {
        let request = Self::request(Command::GetVersion, |_| {});
        let mut reply = self.transact(Command::GetVersion, request, 2)?;
        reply.pop_u16().ok_or(ProtocolError::Truncated)
    }

    /// Queries the first target address available to the host.
    pub fn base_address(&mut self) -> Result<u64, ProtocolError> {
        let request = Self::request(Command::GetBaseAddress, |_| {});
        let mut reply = self.transact(Command::GetBaseAddress, request, 8)?;
        reply.pop_u64().ok_or(ProtocolError::Truncated)
    }

    /// Reads `length` bytes of target memory at `address`.
    pub fn read(&mut self, address: u64, length: u32) -> Result<Vec<u8>, ProtocolError> {
        debug!("read {length} bytes at {address:#x}");
        let request = Self::request(Command::Read, |packet| {
            packet.push_u64(address);
            packet.push_u32(length);
        });
        let mut reply = self.transact(Command::Read, request, 8 + 4 + length as usize)?;
        Self::check_echo(&mut reply, address, length)?;
        let data = reply
            .pop_bytes(length as usize)
            .ok_or(ProtocolError::Truncated)?;
        Ok(data.to_vec())
    }

    /// Writes `data` to target memory at `address`.
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), ProtocolError> {
        debug!("write {} bytes at {address:#x}", data.len());
        let request = Self::request(Command::Write, |packet| {
            packet.push_u64(address);
            packet.push_u32(data.len() as u32);
            packet.push_bytes(data);
        });
        let mut reply = self.transact(Command::Write, request, 8 + 4)?;
        Self::check_echo(&mut reply, address, data.len() as u32)
    }

    /// Executes the context stored at `address` on the target and returns
    /// the called function's result.
    pub fn execute(&mut self, address: u64) -> Result<u64, ProtocolError> {
        debug!("execute context at {address:#x}");
        let request = Self::request(Command::Execute, |packet| {
            packet.push_u64(address);
        });
        let mut reply = self.transact(Command::Execute, request, 8 + 8)?;
        let echoed = reply.pop_u64().ok_or(ProtocolError::Truncated)?;
        if echoed != address {
            return Err(ProtocolError::EchoMismatch("address"));
        }
        reply.pop_u64().ok_or(ProtocolError::Truncated)
    }

    /// Resets the target. The monitor acknowledges before it reboots.
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        debug!("reset target");
        let request = Self::request(Command::Reset, |_| {});
        self.transact(Command::Reset, request, 0)?;
        Ok(())
    }

    fn request(command: Command, build: impl FnOnce(&mut Packet)) -> Packet {
        let mut packet = Packet::new();
        packet.push_u16(command.code());
        build(&mut packet);
        packet.add_crc();
        packet
    }

    /// Sends the request and reads the reply frame: the echoed command
    /// code, `payload_len` payload bytes and one CRC byte — or an error
    /// frame in its place.
    fn transact(
        &mut self,
        command: Command,
        request: Packet,
        payload_len: usize,
    ) -> Result<Packet, ProtocolError> {
        self.connection.send(request.as_bytes())?;

        let mut code_bytes = [0u8; 2];
        self.connection.recv_exact(&mut code_bytes)?;
        let code = u16::from_le_bytes(code_bytes);

        if code == ERROR_REPLY {
            return Err(self.recv_error_frame(code_bytes));
        }
        if code != command.code() {
            return Err(ProtocolError::UnexpectedReply {
                expected: command.code(),
                actual: code,
            });
        }

        let mut rest = vec![0u8; payload_len + 1];
        self.connection.recv_exact(&mut rest)?;
        let mut frame = Vec::with_capacity(2 + rest.len());
        frame.extend_from_slice(&code_bytes);
        frame.extend_from_slice(&rest);

        let mut reply = Packet::from_bytes(frame);
        if !reply.check_crc() {
            return Err(ProtocolError::ReplyCrc);
        }
        let _ = reply.pop_u16(); // command echo, already matched
        Ok(reply)
    }

    /// Consumes the remainder of an error frame (error code + CRC) and
    /// turns it into the matching typed error.
    fn recv_error_frame(&mut self, code_bytes: [u8; 2]) -> ProtocolError {
        let mut rest = [0u8; 3];
        if let Err(error) = self.connection.recv_exact(&mut rest) {
            return ProtocolError::Io(error);
        }
        let mut frame = Vec::with_capacity(5);
        frame.extend_from_slice(&code_bytes);
        frame.extend_from_slice(&rest);

        let mut reply = Packet::from_bytes(frame);
        if !reply.check_crc() {
            return ProtocolError::ReplyCrc;
        }
        let _ = reply.pop_u16(); // error sentinel
        match reply.pop_u16() {
            Some(code) => match ErrorCode::from_code(code) {
                Some(code) => ProtocolError::Target(code),
                None => ProtocolError::UnknownErrorCode(code),
            },
            None => ProtocolError::Truncated,
        }
    }

    fn check_echo(reply: &mut Packet, address: u64, length: u32) -> Result<(), ProtocolError> {
        let echoed_address = reply.pop_u64().ok_or(ProtocolError::Truncated)?;
        let echoed_length = reply.pop_u32().ok_or(ProtocolError::Truncated)?;
        if echoed_address != address {
            return Err(ProtocolError::EchoMismatch("address"));
        }
        if echoed_length != length {
            return Err(ProtocolError::EchoMismatch("length"));
        }
        Ok(())
    }
}
