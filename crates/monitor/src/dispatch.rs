// MonLink - Bare-Metal Debug Monitor
// Copyright (C) 2026 MonLink Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The command loop: decode one frame, apply the base-address policy,
//! perform the effect, reply.

use monlink_wire::{Command, ErrorCode, PacketIo, Transport, ERROR_REPLY, PROTOCOL_VERSION};

use crate::device::Device;

/// Outcome of processing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The reset reply has been sent and flushed; the caller must now
    /// invoke the hard-reset primitive.
    Reset,
}

/// Serves the wire protocol over a transport against a device.
///
/// `base` is the first address available to the host; everything below it
/// is the monitor's own resident region, protected from Write and Execute.
pub struct Dispatcher<T: Transport, D: Device> {
    link: PacketIo<T>,
    device: D,
    base: u64,
}

impl<T: Transport, D: Device> Dispatcher<T, D> {
    pub fn new(transport: T, device: D, base: u64) -> Self {
        Self {
            link: PacketIo::new(transport),
            device,
            base,
        }
    }

    /// Serves frames forever. The only exit is the reset primitive, which
    /// does not return.
    pub fn run(mut self) -> ! {
        loop {
            if let Step::Reset = self.poll() {
                self.device.hard_reset();
            }
        }
    }

    /// Processes exactly one frame: one request in, one reply out, then a
    /// transport flush. Every path replies, including every error path, so
    /// the stream stays synchronized frame-for-frame.
    pub fn poll(&mut self) -> Step {
        self.link.rx_start();
        let code = self.link.rx_u16();

        let step = match Command::from_code(code) {
            Some(Command::GetVersion) => {
                self.get_version();
                Step::Continue
            }
            Some(Command::GetBaseAddress) => {
                self.get_base_address();
                Step::Continue
            }
            Some(Command::Read) => {
                self.read();
                Step::Continue
            }
            Some(Command::Write) => {
                self.write();
                Step::Continue
            }
            Some(Command::Execute) => {
                self.execute();
                Step::Continue
            }
            Some(Command::Reset) => self.reset(),
            None => {
                self.send_error(ErrorCode::InvalidCommand);
                Step::Continue
            }
        };

        self.link.flush();
        step
    }

    fn get_version(&mut self) {
        if self.link.rx_check_crc() {
            self.link.tx_start();
            self.link.tx_u16(Command::GetVersion.code());
            self.link.tx_u16(PROTOCOL_VERSION);
            self.link.tx_crc();
        } else {
            self.send_error(ErrorCode::InvalidCrc);
        }
    }

    fn get_base_address(&mut self) {
        if self.link.rx_check_crc() {
            self.link.tx_start();
            self.link.tx_u16(Command::GetBaseAddress.code());
            self.link.tx_u64(self.base);
            self.link.tx_crc();
        } else {
            self.send_error(ErrorCode::InvalidCrc);
        }
    }

    fn read(&mut self) {
        let address = self.link.rx_u64();
        let length = self.link.rx_u32();
        if self.link.rx_check_crc() {
            self.link.tx_start();
            self.link.tx_u16(Command::Read.code());
            self.link.tx_u64(address);
            self.link.tx_u32(length);
            for i in 0..length as u64 {
                let byte = self.device.read_u8(address + i);
                self.link.tx_u8(byte);
            }
            self.link.tx_crc();
        } else {
            self.send_error(ErrorCode::InvalidCrc);
        }
    }

    fn write(&mut self) {
        let address = self.link.rx_u64();
        let length = self.link.rx_u32();
        if address >= self.base {
            for i in 0..length as u64 {
                let byte = self.link.rx_u8();
                self.device.write_u8(address + i, byte);
            }
            if self.link.rx_check_crc() {
                self.link.tx_start();
                self.link.tx_u16(Command::Write.code());
                self.link.tx_u64(address);
                self.link.tx_u32(length);
                self.link.tx_crc();
            } else {
                self.send_error(ErrorCode::InvalidCrc);
            }
        } else {
            // The payload still has to leave the wire for the stream to
            // stay framed; the CRC byte is consumed the same way and its
            // outcome is not reported separately.
            self.link.rx_discard(length as usize);
            let _ = self.link.rx_check_crc();
            self.send_error(ErrorCode::InvalidArgument);
        }
    }

    fn execute(&mut self) {
        let address = self.link.rx_u64();
        if self.link.rx_check_crc() {
            if address >= self.base {
                let result = self.invoke_context(address);
                self.link.tx_start();
                self.link.tx_u16(Command::Execute.code());
                self.link.tx_u64(address);
                self.link.tx_u64(result);
                self.link.tx_crc();
            } else {
                // The context would live inside the monitor's region; it is
                // never even read.
                self.send_error(ErrorCode::InvalidArgument);
            }
        } else {
            self.send_error(ErrorCode::InvalidCrc);
        }
    }

    /// Loads the execution context at `address`, performs the call, and
    /// stores the return value back into the first argument slot.
    fn invoke_context(&mut self, address: u64) -> u64 {
        let function = self.device.read_u64(address);
        let mut args = [0u64; 8];
        for (i, arg) in args.iter_mut().enumerate() {
            *arg = self.device.read_u64(address + 8 + (i as u64) * 8);
        }
        let result = unsafe { self.device.call(function, &args) };
        self.device.write_u64(address + 8, result);
        result
    }

    fn reset(&mut self) -> Step {
        if self.link.rx_check_crc() {
            self.link.tx_start();
            self.link.tx_u16(Command::Reset.code());
            self.link.tx_crc();
            Step::Reset
        } else {
            self.send_error(ErrorCode::InvalidCrc);
            Step::Continue
        }
    }

    fn send_error(&mut self, code: ErrorCode) {
        self.link.tx_start();
        self.link.tx_u16(ERROR_REPLY);
        self.link.tx_u16(code.code());
        self.link.tx_crc();
    }
}
