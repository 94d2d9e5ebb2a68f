// MonLink - Bare-Metal Debug Monitor
// Copyright (C) 2026 MonLink Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Frame-level I/O over a byte transport.
//!
//! [`PacketIo`] owns one checksum accumulator per direction and folds every
//! transferred byte into the matching one. The accumulators are reset at
//! each frame boundary via [`PacketIo::rx_start`] / [`PacketIo::tx_start`];
//! a received frame is validated exactly once with
//! [`PacketIo::rx_check_crc`], a transmitted frame is sealed exactly once
//! with [`PacketIo::tx_crc`]. Skipping either, or doing it twice,
//! desynchronizes the byte stream for every following frame.

use crate::crc;

/// Blocking byte transport under the codec.
///
/// Operations have no error path: on the target a stalled link simply
/// blocks the single thread forever, which is accepted behavior for a
/// device with nothing else to do.
pub trait Transport {
    fn send(&mut self, byte: u8);
    fn recv(&mut self) -> u8;
    fn flush(&mut self);
}

/// Frame codec: length-free framing with one trailing CRC-8 byte per
/// direction. Multi-byte integers are little-endian on the wire.
pub struct PacketIo<T: Transport> {
    transport: T,
    rx_crc: u8,
    tx_crc: u8,
}

impl<T: Transport> PacketIo<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            rx_crc: 0,
            tx_crc: 0,
        }
    }

    /// Starts a new receive frame.
    pub fn rx_start(&mut self) {
        self.rx_crc = 0;
    }

    pub fn rx_u8(&mut self) -> u8 {
        let byte = self.transport.recv();
        self.rx_crc = crc::step(self.rx_crc, byte);
        byte
    }

    pub fn rx_u16(&mut self) -> u16 {
        u16::from_le_bytes([self.rx_u8(), self.rx_u8()])
    }

    pub fn rx_u32(&mut self) -> u32 {
        u32::from_le_bytes([self.rx_u8(), self.rx_u8(), self.rx_u8(), self.rx_u8()])
    }

    pub fn rx_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.rx_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    pub fn rx_bytes(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte = self.rx_u8();
        }
    }

    /// Consumes and discards `len` payload bytes while still folding them
    /// into the checksum, so a rejected frame's trailing CRC byte can be
    /// consumed in lock-step and the stream stays framed.
    pub fn rx_discard(&mut self, len: usize) {
        for _ in 0..len {
            self.rx_u8();
        }
    }

    /// Reads the frame's trailing checksum byte and compares it against the
    /// accumulator. The trailing byte itself is not folded.
    pub fn rx_check_crc(&mut self) -> bool {
        self.transport.recv() == self.rx_crc
    }

    /// Starts a new transmit frame.
    pub fn tx_start(&mut self) {
        self.tx_crc = 0;
    }

    pub fn tx_u8(&mut self, value: u8) {
        self.tx_crc = crc::step(self.tx_crc, value);
        self.transport.send(value);
    }

    pub fn tx_u16(&mut self, value: u16) {
        self.tx_bytes(&value.to_le_bytes());
    }

    pub fn tx_u32(&mut self, value: u32) {
        self.tx_bytes(&value.to_le_bytes());
    }

    pub fn tx_u64(&mut self, value: u64) {
        self.tx_bytes(&value.to_le_bytes());
    }

    pub fn tx_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.tx_u8(byte);
        }
    }

    /// Seals the transmit frame with the accumulated checksum.
    pub fn tx_crc(&mut self) {
        self.transport.send(self.tx_crc);
    }

    pub fn flush(&mut self) {
        self.transport.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Packet;
    use alloc::vec::Vec;
    use std::collections::VecDeque;

    struct Loopback {
        incoming: VecDeque<u8>,
        outgoing: Vec<u8>,
    }

    impl Loopback {
        fn with_input(bytes: &[u8]) -> Self {
            Self {
                incoming: bytes.iter().copied().collect(),
                outgoing: Vec::new(),
            }
        }
    }

    impl Transport for Loopback {
        fn send(&mut self, byte: u8) {
            self.outgoing.push(byte);
        }

        fn recv(&mut self) -> u8 {
            self.incoming.pop_front().expect("transport ran dry")
        }

        fn flush(&mut self) {}
    }

    #[test]
    fn tx_frame_matches_packet_builder() {
        let mut packet = Packet::new();
        packet.push_u16(0x0003);
        packet.push_u64(0x1234_5678_9abc_def0);
        packet.push_u32(4);
        packet.push_bytes(&[0xde, 0xad, 0xbe, 0xef]);
        packet.add_crc();

        let mut io = PacketIo::new(Loopback::with_input(&[]));
        io.tx_start();
        io.tx_u16(0x0003);
        io.tx_u64(0x1234_5678_9abc_def0);
        io.tx_u32(4);
        io.tx_bytes(&[0xde, 0xad, 0xbe, 0xef]);
        io.tx_crc();

        assert_eq!(io.transport.outgoing, packet.as_bytes());
    }

    #[test]
    fn rx_accepts_frame_sealed_by_packet_builder() {
        let mut packet = Packet::new();
        packet.push_u16(0x0002);
        packet.push_u64(0x8000_0000);
        packet.push_u32(16);
        packet.add_crc();

        let mut io = PacketIo::new(Loopback::with_input(packet.as_bytes()));
        io.rx_start();
        assert_eq!(io.rx_u16(), 0x0002);
        assert_eq!(io.rx_u64(), 0x8000_0000);
        assert_eq!(io.rx_u32(), 16);
        assert!(io.rx_check_crc());
    }

    #[test]
    fn rx_rejects_flipped_payload_bit() {
        let mut packet = Packet::new();
        packet.push_u16(0x0001);
        packet.push_u64(0x0008_0000);
        packet.add_crc();
        let mut bytes = packet.as_bytes().to_vec();
        bytes[5] ^= 0x01;

        let mut io = PacketIo::new(Loopback::with_input(&bytes));
        io.rx_start();
        io.rx_u16();
        io.rx_u64();
        assert!(!io.rx_check_crc());
    }

    #[test]
    fn rx_discard_keeps_checksum_in_lock_step() {
        let mut packet = Packet::new();
        packet.push_u16(0x0003);
        packet.push_bytes(&[1, 2, 3, 4, 5]);
        packet.add_crc();

        let mut io = PacketIo::new(Loopback::with_input(packet.as_bytes()));
        io.rx_start();
        io.rx_u16();
        io.rx_discard(5);
        assert!(io.rx_check_crc());
        assert!(io.transport.incoming.is_empty());
    }

    #[test]
    fn accumulators_reset_per_frame() {
        let mut first = Packet::new();
        first.push_u16(0x0000);
        first.add_crc();
        let mut second = Packet::new();
        second.push_u16(0x0005);
        second.add_crc();

        let mut stream = first.as_bytes().to_vec();
        stream.extend_from_slice(second.as_bytes());

        let mut io = PacketIo::new(Loopback::with_input(&stream));
        for expected in [0x0000, 0x0005] {
            io.rx_start();
            assert_eq!(io.rx_u16(), expected);
            assert!(io.rx_check_crc());
        }
    }
}
