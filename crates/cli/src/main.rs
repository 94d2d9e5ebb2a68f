// MonLink - Bare-Metal Debug Monitor
// Copyright (C) 2026 MonLink Contributors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::info;

use monlink_host::{image, Client, Connection, LinkProfile, SerialConnection};

#[derive(Parser, Debug)]
#[command(author, version, about = "Host tool for the MonLink debug monitor", long_about = None)]
struct Cli {
    /// Link profile (YAML) describing port, baud rate and timeout
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Serial port of the target (overrides the profile)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (overrides the profile)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Per-read timeout in milliseconds (overrides the profile)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable debug-level tracing
    #[arg(short, long)]
    trace: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Query the protocol version and base address
    Info {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Read target memory
    Read {
        #[arg(short, long, value_parser = parse_address)]
        address: u64,
        /// Length in bytes; accepts human sizes like "4KB"
        #[arg(short, long, value_parser = parse_length)]
        length: u32,
        /// Write raw bytes to a file instead of hexdumping to stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Write target memory
    Write {
        #[arg(short, long, value_parser = parse_address)]
        address: u64,
        /// File containing the bytes to write
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Inline hex bytes, e.g. "de ad be ef"
        #[arg(long)]
        hex: Option<String>,
    },
    /// Execute a call context previously written to target memory
    Exec {
        #[arg(short, long, value_parser = parse_address)]
        context: u64,
    },
    /// Upload an ELF image to target memory
    Load {
        firmware: PathBuf,
        /// Read every segment back and compare SHA-256 digests
        #[arg(long)]
        verify: bool,
    },
    /// Upload an ELF image and call its entry point
    Run {
        firmware: PathBuf,
        /// Entry point arguments (repeatable, up to eight)
        #[arg(long = "arg", value_parser = parse_address)]
        args: Vec<u64>,
    },
    /// Hard-reset the target
    Reset,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let profile = resolve_profile(&cli)?;
    info!("Connecting to {} at {} baud", profile.port, profile.baud);
    let connection = SerialConnection::open(&profile.port, profile.baud, profile.timeout())?;
    let mut client = Client::new(connection);

    match cli.command {
        Cmd::Info { json } => info_command(&mut client, json),
        Cmd::Read {
            address,
            length,
            out,
        } => read_command(&mut client, address, length, out),
        Cmd::Write { address, file, hex } => write_command(&mut client, address, file, hex),
        Cmd::Exec { context } => {
            let result = client.execute(context)?;
            println!("result: {result:#x}");
            Ok(())
        }
        Cmd::Load { firmware, verify } => load_command(&mut client, &firmware, verify),
        Cmd::Run { firmware, args } => run_command(&mut client, &firmware, &args),
        Cmd::Reset => {
            client.reset()?;
            info!("Target reset");
            Ok(())
        }
    }
}

fn resolve_profile(cli: &Cli) -> Result<LinkProfile> {
    let mut profile = match &cli.profile {
        Some(path) => LinkProfile::from_file(path)?,
        None => LinkProfile {
            port: String::new(),
            baud: 115_200,
            timeout_ms: 5_000,
        },
    };
    if let Some(port) = &cli.port {
        profile.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        profile.baud = baud;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        profile.timeout_ms = timeout_ms;
    }
    if profile.port.is_empty() {
        bail!("No serial port given: pass --port or --profile");
    }
    profile.validate()?;
    Ok(profile)
}

fn info_command<C: Connection>(client: &mut Client<C>, json: bool) -> Result<()> {
    let version = client.version()?;
    let base_address = client.base_address()?;

    if json {
        #[derive(Serialize)]
        struct Info {
            version: String,
            base_address: String,
        }
        let info = Info {
            version: format!("{version:#06x}"),
            base_address: format!("{base_address:#x}"),
        };
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("protocol version: {version:#06x}");
        println!("base address:     {base_address:#x}");
    }
    Ok(())
}

fn read_command<C: Connection>(
    client: &mut Client<C>,
    address: u64,
    length: u32,
    out: Option<PathBuf>,
) -> Result<()> {
    let data = client.read(address, length)?;
    match out {
        Some(path) => {
            std::fs::write(&path, &data)
                .with_context(|| format!("Failed to write output file {path:?}"))?;
            info!("Wrote {} bytes to {:?}", data.len(), path);
        }
        None => hexdump(address, &data),
    }
    Ok(())
}

fn write_command<C: Connection>(
    client: &mut Client<C>,
    address: u64,
    file: Option<PathBuf>,
    hex: Option<String>,
) -> Result<()> {
    let data = match (file, hex) {
        (Some(path), None) => std::fs::read(&path)
            .with_context(|| format!("Failed to read input file {path:?}"))?,
        (None, Some(hex)) => parse_hex_bytes(&hex)?,
        _ => bail!("Give the data exactly one way: --file or --hex"),
    };
    client.write(address, &data)?;
    info!("Wrote {} bytes at {:#x}", data.len(), address);
    Ok(())
}

fn load_command<C: Connection>(
    client: &mut Client<C>,
    firmware: &PathBuf,
    verify: bool,
) -> Result<()> {
    let program = image::load_elf(firmware)?;
    info!(
        "Loaded {:?}: {} segment(s), entry {:#x}",
        firmware,
        program.segments.len(),
        program.entry_point
    );

    image::program(client, &program)?;

    if verify {
        for segment in &program.segments {
            let readback = client.read(segment.start_addr, segment.data.len() as u32)?;
            let sent = Sha256::digest(&segment.data);
            let received = Sha256::digest(&readback);
            if sent != received {
                bail!(
                    "Verification failed for segment at {:#x}: digest mismatch",
                    segment.start_addr
                );
            }
            let digest: String = sent.iter().map(|byte| format!("{byte:02x}")).collect();
            info!("Verified segment at {:#x}: sha256 {}", segment.start_addr, digest);
        }
    }

    info!("Upload complete");
    Ok(())
}

fn run_command<C: Connection>(client: &mut Client<C>, firmware: &PathBuf, args: &[u64]) -> Result<()> {
    if args.len() > 8 {
        bail!("The target passes at most eight arguments");
    }
    let mut padded = [0u64; 8];
    padded[..args.len()].copy_from_slice(args);

    let program = image::load_elf(firmware)?;
    image::program(client, &program)?;
    info!("Launching entry point {:#x}", program.entry_point);

    let result = image::launch(client, &program, padded)?;
    println!("result: {result:#x}");
    Ok(())
}

/// Accepts `0x`-prefixed hex or plain decimal.
fn parse_address(text: &str) -> Result<u64, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| format!("invalid address '{text}'"))
}

/// Accepts a plain byte count or a human size such as "4KB".
fn parse_length(text: &str) -> Result<u32, String> {
    let bytes = match text.trim().parse::<u64>() {
        Ok(value) => value,
        Err(_) => {
            use human_size::{Byte, Size, SpecificSize};
            let size: Size = text
                .parse()
                .map_err(|_| format!("invalid length '{text}'"))?;
            let bytes: SpecificSize<Byte> = size.into();
            bytes.value() as u64
        }
    };
    u32::try_from(bytes).map_err(|_| format!("length '{text}' exceeds the 32-bit wire field"))
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    text.split_whitespace()
        .map(|token| {
            u8::from_str_radix(token, 16).map_err(|_| anyhow!("invalid hex byte '{token}'"))
        })
        .collect()
}

fn hexdump(base: u64, data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let offset = base + (row * 16) as u64;
        let hex: Vec<String> = chunk.iter().map(|byte| format!("{byte:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&byte| {
                if byte.is_ascii_graphic() || byte == b' ' {
                    byte as char
                } else {
                    '.'
                }
            })
            .collect();
        println!("{offset:08x}  {:<47}  |{ascii}|", hex.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_address_accepts_hex_and_decimal() {
        assert_eq!(parse_address("0x80000").unwrap(), 0x80000);
        assert_eq!(parse_address("0X10").unwrap(), 0x10);
        assert_eq!(parse_address("42").unwrap(), 42);
        assert!(parse_address("zz").is_err());
    }

    #[test]
    fn parse_length_accepts_plain_and_human_sizes() {
        assert_eq!(parse_length("16").unwrap(), 16);
        assert_eq!(parse_length("4KiB").unwrap(), 4_096);
        assert_eq!(parse_length("2MB").unwrap(), 2_000_000);
        assert!(parse_length("banana").is_err());
    }

    #[test]
    fn parse_hex_bytes_round_trip() {
        assert_eq!(
            parse_hex_bytes("de ad be ef").unwrap(),
            vec![0xde, 0xad, 0xbe, 0xef]
        );
        assert!(parse_hex_bytes("de xx").is_err());
    }
}
