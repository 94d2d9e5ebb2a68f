// MonLink - Bare-Metal Debug Monitor
// Copyright (C) 2026 MonLink Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The monitor binary for a PL011-style UART at 0x4000_C000 (UART0 on
//! LM3S-class parts and the usual QEMU Cortex-M3 board). The boot ROM is
//! expected to leave the UART configured; the monitor only moves bytes.

#![no_main]
#![no_std]

use panic_halt as _;

use cortex_m::peripheral::SCB;
use cortex_m_rt::entry;

use monlink_monitor::{Dispatcher, RawDevice};
use monlink_wire::Transport;

const UART_BASE: usize = 0x4000_C000;
const UART_DR: *mut u32 = UART_BASE as *mut u32;
const UART_FR: *const u32 = (UART_BASE + 0x18) as *const u32;

const FR_BUSY: u32 = 1 << 3;
const FR_RXFE: u32 = 1 << 4;
const FR_TXFF: u32 = 1 << 5;

/// Blocking PL011 transport: spin on the flag register, move one byte.
struct Pl011;

impl Transport for Pl011 {
    fn send(&mut self, byte: u8) {
        unsafe {
            while core::ptr::read_volatile(UART_FR) & FR_TXFF != 0 {}
            core::ptr::write_volatile(UART_DR, byte as u32);
        }
    }

    fn recv(&mut self) -> u8 {
        unsafe {
            while core::ptr::read_volatile(UART_FR) & FR_RXFE != 0 {}
            core::ptr::read_volatile(UART_DR) as u8
        }
    }

    fn flush(&mut self) {
        unsafe { while core::ptr::read_volatile(UART_FR) & FR_BUSY != 0 {} }
    }
}

fn hard_reset() -> ! {
    SCB::sys_reset()
}

#[entry]
fn main() -> ! {
    // Everything below the heap start is the monitor's code and statics;
    // that address is what GetBaseAddress reports and what the write and
    // execute policies enforce.
    let base_address = cortex_m_rt::heap_start() as u64;

    // Sound here: flat physical address space, and the debug host on the
    // other end of the UART is trusted with everything above base_address.
    let device = unsafe { RawDevice::new(hard_reset) };

    Dispatcher::new(Pl011, device, base_address).run()
}
