// MonLink - Bare-Metal Debug Monitor
// Copyright (C) 2026 MonLink Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! ELF images: parsing on the host, uploading and launching on the target.

use anyhow::{anyhow, Context, Result};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use monlink_wire::ExecutionContext;

use crate::client::Client;
use crate::connection::Connection;
use crate::ProtocolError;

#[derive(Debug, Clone)]
pub struct Segment {
    pub start_addr: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ProgramImage {
    pub entry_point: u64,
    pub segments: Vec<Segment>,
}

impl ProgramImage {
    pub fn new(entry_point: u64) -> Self {
        Self {
            entry_point,
            segments: Vec::new(),
        }
    }

    pub fn add_segment(&mut self, start_addr: u64, data: Vec<u8>) {
        self.segments.push(Segment { start_addr, data });
    }

    /// One past the highest address any segment occupies.
    pub fn end_addr(&self) -> u64 {
        self.segments
            .iter()
            .map(|segment| segment.start_addr + segment.data.len() as u64)
            .max()
            .unwrap_or(0)
    }
}

/// Parses the PT_LOAD segments of an ELF binary into a [`ProgramImage`].
pub fn load_elf(path: &Path) -> Result<ProgramImage> {
    let buffer = fs::read(path).with_context(|| format!("Failed to read ELF file: {:?}", path))?;

    let elf = Elf::parse(&buffer).context("Failed to parse ELF binary")?;

    info!("ELF Entry Point: {:#x}", elf.entry);

    let mut program_image = ProgramImage::new(elf.entry);

    for ph in elf.program_headers {
        if ph.p_type == PT_LOAD {
            // Physical address (LMA) is what the monitor writes to.
            let start_addr = ph.p_paddr;
            let size = ph.p_filesz as usize;
            let offset = ph.p_offset as usize;

            if size == 0 {
                continue;
            }

            debug!(
                "Found Loadable Segment: Addr={:#x}, Size={} bytes, Offset={:#x}",
                start_addr, size, offset
            );

            if offset + size > buffer.len() {
                return Err(anyhow!("Segment out of bounds in ELF file"));
            }

            let segment_data = buffer[offset..offset + size].to_vec();
            program_image.add_segment(start_addr, segment_data);
        }
    }

    if program_image.segments.is_empty() {
        warn!("No loadable segments found in ELF file");
    }

    Ok(program_image)
}

/// Writes every segment of `image` into target memory.
pub fn program<C: Connection>(
    client: &mut Client<C>,
    image: &ProgramImage,
) -> Result<(), ProtocolError> {
    for segment in &image.segments {
        debug!(
            "uploading segment: {} bytes at {:#x}",
            segment.data.len(),
            segment.start_addr
        );
        client.write(segment.start_addr, &segment.data)?;
    }
    Ok(())
}

/// Address where [`launch`] places the execution context: just past the
/// image, 16-byte aligned.
pub fn context_addr(image: &ProgramImage) -> u64 {
    (image.end_addr() + 15) & !15
}

/// Launches an uploaded image: stores an execution context for its entry
/// point past the image end and executes it, returning the entry point's
/// result.
pub fn launch<C: Connection>(
    client: &mut Client<C>,
    image: &ProgramImage,
    args: [u64; 8],
) -> Result<u64, ProtocolError> {
    let context_addr = context_addr(image);
    let context = ExecutionContext::new(image.entry_point, args);
    debug!(
        "launching entry {:#x} with context at {:#x}",
        image.entry_point, context_addr
    );
    client.write(context_addr, &context.to_le_bytes())?;
    client.execute(context_addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_addr_spans_all_segments() {
        let mut image = ProgramImage::new(0x8_0000);
        image.add_segment(0x8_0000, vec![0; 0x100]);
        image.add_segment(0x9_0000, vec![0; 0x20]);
        assert_eq!(image.end_addr(), 0x9_0020);
    }

    #[test]
    fn context_lands_past_image_aligned() {
        let mut image = ProgramImage::new(0x8_0000);
        image.add_segment(0x8_0000, vec![0; 0x101]);
        let addr = context_addr(&image);
        assert!(addr >= image.end_addr());
        assert_eq!(addr % 16, 0);
    }

    #[test]
    fn empty_image_has_zero_end() {
        let image = ProgramImage::new(0);
        assert_eq!(image.end_addr(), 0);
    }
}
