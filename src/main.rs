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

use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use cobsxfer::gate::{Shutdown, TransportGate};
use cobsxfer::sender::TransferConfig;
use cobsxfer::serial::RealSerialPort;
use cobsxfer::{protocol, receiver, sender};

#[derive(Parser)]
#[command(name = "cobsxfer")]
#[command(about = "Chunked file transfer over a COBS-framed serial link", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/rfcomm0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = protocol::DEFAULT_BAUD)]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Milliseconds between checks while waiting for the port to accept a write
    #[arg(long, default_value = "100", value_name = "MS")]
    poll_interval: u64,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// File to send
        file: PathBuf,

        /// Target size of each frame on the wire, in bytes
        #[arg(long, default_value_t = protocol::DEFAULT_FRAME_SIZE, value_name = "BYTES")]
        frame_size: usize,
    },
    /// Receive a file, acting as the remote device
    Receive {
        /// Where to store the received file
        #[arg(short, long, default_value = "received.bin")]
        output: PathBuf,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let settings = parse_data_bits(cli.data_bits).and_then(|data_bits| {
        Ok((data_bits, parse_parity(&cli.parity)?, parse_stop_bits(cli.stop_bits)?))
    });
    let (data_bits, parity, stop_bits) = match settings {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(port = %cli.port, baud = cli.baud, ?data_bits, ?parity, ?stop_bits, "Opening serial port");

    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open serial port");
            std::process::exit(1);
        }
    };

    let poll_interval = Duration::from_millis(cli.poll_interval);

    match cli.command {
        Commands::Send { file, frame_size } => {
            tracing::info!(file = %file.display(), "Sending file");
            let config = TransferConfig { frame_size, poll_interval };
            if let Err(e) = send_file(serial_port, file, config) {
                tracing::error!(error = %e, "Send failed");
                std::process::exit(1);
            }
            tracing::info!("File sent successfully");
        }
        Commands::Receive { output } => {
            tracing::info!(output = %output.display(), "Receiving file");
            if let Err(e) = receive_file(serial_port, output, TransportGate::new(poll_interval)) {
                tracing::error!(error = %e, "Receive failed");
                std::process::exit(1);
            }
            tracing::info!("File received successfully");
        }
    }
}

fn send_file(serial_port: RealSerialPort, file: PathBuf, config: TransferConfig) -> Result<(), sender::SenderError> {
    use sender::SenderFsm;

    let data = std::fs::read(&file).map_err(|e| {
        sender::SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", file.display(), e),
        ))
    })?;

    // SIGINT still ends the process directly, without notifying the device.
    let mut state = SenderFsm::new(Box::new(serial_port), data, config, Shutdown::new())?;

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(sender::SenderError::TransferComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}

fn receive_file(serial_port: RealSerialPort, output: PathBuf, gate: TransportGate) -> Result<(), receiver::ReceiverError> {
    use receiver::ReceiverFsm;

    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            return Err(receiver::ReceiverError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Output directory not found: {}", dir.display()),
            )));
        }
    }

    let mut state = ReceiverFsm::new(Box::new(serial_port), output, gate, Shutdown::new());

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(receiver::ReceiverError::TransferComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}
