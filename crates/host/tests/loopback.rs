// MonLink - Bare-Metal Debug Monitor
// Copyright (C) 2026 MonLink Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! End-to-end tests: the host [`Client`] talking to a real [`Dispatcher`]
//! over in-memory byte channels, so the monitor's blocking transport
//! contract is exercised the way a UART would.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use monlink_host::{image, Client, Connection, ProtocolError};
use monlink_monitor::{Device, Dispatcher, Step};
use monlink_wire::{ErrorCode, ExecutionContext, Packet, Transport, ERROR_REPLY};

/// First host-usable address; everything below belongs to the "monitor".
const BASE: u64 = 0x2000;
const WINDOW: usize = 0x4000;

struct ChannelTransport {
    rx: Receiver<u8>,
    tx: Sender<u8>,
}

impl Transport for ChannelTransport {
    fn send(&mut self, byte: u8) {
        let _ = self.tx.send(byte);
    }

    fn recv(&mut self) -> u8 {
        match self.rx.recv() {
            Ok(byte) => byte,
            // Peer gone; a real UART would block forever, so park.
            Err(_) => loop {
                thread::park();
            },
        }
    }

    fn flush(&mut self) {}
}

struct ChannelConnection {
    tx: Sender<u8>,
    rx: Receiver<u8>,
}

impl Connection for ChannelConnection {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        for &byte in data {
            self.tx
                .send(byte)
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        }
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        for slot in buf.iter_mut() {
            *slot = self
                .rx
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))?;
        }
        Ok(())
    }
}

/// Flat memory plus a deterministic "function": calling address `f` with
/// args yields `f` plus the wrapping sum of the args, so results are
/// observable without shared state.
struct LoopDevice {
    mem: Vec<u8>,
}

impl LoopDevice {
    fn new() -> Self {
        Self {
            mem: vec![0; WINDOW],
        }
    }
}

impl Device for LoopDevice {
    fn read_u8(&mut self, addr: u64) -> u8 {
        self.mem[addr as usize]
    }

    fn write_u8(&mut self, addr: u64, value: u8) {
        self.mem[addr as usize] = value;
    }

    unsafe fn call(&mut self, function: u64, args: &[u64; 8]) -> u64 {
        args.iter().fold(function, |acc, arg| acc.wrapping_add(*arg))
    }

    fn hard_reset(&mut self) -> ! {
        unreachable!("loopback monitor stops at Step::Reset");
    }
}

/// Spawns a monitor serving frames until a reset is acknowledged or the
/// host goes away.
fn spawn_monitor() -> ChannelConnection {
    let (host_tx, monitor_rx) = mpsc::channel();
    let (monitor_tx, host_rx) = mpsc::channel();
    thread::spawn(move || {
        let transport = ChannelTransport {
            rx: monitor_rx,
            tx: monitor_tx,
        };
        let mut dispatcher = Dispatcher::new(transport, LoopDevice::new(), BASE);
        while let Step::Continue = dispatcher.poll() {}
    });
    ChannelConnection {
        tx: host_tx,
        rx: host_rx,
    }
}

#[test]
fn version_and_base_address() {
    let mut client = Client::new(spawn_monitor());
    assert_eq!(client.version().unwrap(), 0x0100);
    assert_eq!(client.base_address().unwrap(), BASE);
}

#[test]
fn write_read_round_trip() {
    let mut client = Client::new(spawn_monitor());
    let data: Vec<u8> = (0..64).collect();
    client.write(BASE + 0x100, &data).unwrap();
    assert_eq!(client.read(BASE + 0x100, data.len() as u32).unwrap(), data);
}

#[test]
fn write_below_base_is_rejected_and_link_survives() {
    let mut client = Client::new(spawn_monitor());
    match client.write(BASE - 0x10, &[1, 2, 3]) {
        Err(ProtocolError::Target(ErrorCode::InvalidArgument)) => {}
        other => panic!("expected invalid-argument, got {other:?}"),
    }
    // The stream must still be framed after the rejection.
    assert_eq!(client.version().unwrap(), 0x0100);
    assert_eq!(client.read(BASE - 0x10, 3).unwrap(), vec![0, 0, 0]);
}

#[test]
fn execute_round_trip_stores_result() {
    let mut client = Client::new(spawn_monitor());
    let context_addr = BASE + 0x200;
    let context = ExecutionContext::new(0x3000, [1, 2, 3, 4, 5, 6, 7, 8]);
    client.write(context_addr, &context.to_le_bytes()).unwrap();

    let expected = 0x3000 + (1..=8).sum::<u64>();
    assert_eq!(client.execute(context_addr).unwrap(), expected);

    // The monitor writes the result back into the first argument slot.
    let slot = client.read(context_addr + 8, 8).unwrap();
    assert_eq!(slot, expected.to_le_bytes());
}

#[test]
fn execute_below_base_is_rejected() {
    let mut client = Client::new(spawn_monitor());
    match client.execute(BASE - 0x100) {
        Err(ProtocolError::Target(ErrorCode::InvalidArgument)) => {}
        other => panic!("expected invalid-argument, got {other:?}"),
    }
    assert_eq!(client.version().unwrap(), 0x0100);
}

#[test]
fn program_and_launch_an_image() {
    let mut client = Client::new(spawn_monitor());
    let mut program = image::ProgramImage::new(BASE + 0x800);
    program.add_segment(BASE + 0x800, vec![0x90; 0x40]);
    program.add_segment(BASE + 0x900, vec![0x55; 0x10]);

    image::program(&mut client, &program).unwrap();
    assert_eq!(client.read(BASE + 0x800, 0x40).unwrap(), vec![0x90; 0x40]);

    let args = [9, 0, 0, 0, 0, 0, 0, 1];
    let result = image::launch(&mut client, &program, args).unwrap();
    assert_eq!(result, (BASE + 0x800) + 10);
}

#[test]
fn reset_is_acknowledged() {
    let mut client = Client::new(spawn_monitor());
    client.reset().unwrap();
}

#[test]
fn unknown_command_gets_error_frame() {
    let mut connection = spawn_monitor();
    let mut request = Packet::new();
    request.push_u16(0xBEEF);
    request.add_crc();
    connection.send(request.as_bytes()).unwrap();

    let mut reply = [0u8; 5];
    connection.recv_exact(&mut reply).unwrap();
    let frame = Packet::from_bytes(reply.to_vec());
    assert!(frame.check_crc());
    assert_eq!(u16::from_le_bytes([reply[0], reply[1]]), ERROR_REPLY);
    assert_eq!(
        u16::from_le_bytes([reply[2], reply[3]]),
        ErrorCode::InvalidCommand.code()
    );
}
