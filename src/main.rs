// MightyZap 寄存器读取工具
// Reads one or more registers from a MightyZap actuator and prints them

use anyhow::Context;
use clap::Parser;
use mightyzap::{RegisterClient, ZapError};
use serde::Serialize;

/// Read MightyZap registers over Modbus ASCII
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Serial port the actuator is attached to
    #[clap(long, default_value = "COM4")]
    port: String,

    /// Modbus slave address of the actuator
    #[clap(long, default_value = "1")]
    address: u8,

    /// Run the device initialization hook after opening
    #[clap(long)]
    initialize: bool,

    /// Interpret register words as signed 16-bit values
    #[clap(long)]
    signed: bool,

    /// Print results as JSON
    #[clap(long)]
    json: bool,

    /// Logical register numbers (3xxxx input, 4xxxx holding)
    #[clap(required = true)]
    registers: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct Reading {
    register: u32,
    value: i32,
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    log::info!("Connecting to MightyZap {} on {}", args.address, args.port);

    let client = RegisterClient::new(&args.port, args.address, args.initialize)
        .with_context(|| format!("failed to open {}", args.port))?;
    let readings = client.scoped(|zap| {
        args.registers
            .iter()
            .map(|&register| -> Result<Reading, ZapError> {
                let value = zap.read_register(register, args.signed)?;
                Ok(Reading { register, value })
            })
            .collect::<Result<Vec<_>, ZapError>>()
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&readings)?);
    } else {
        for reading in &readings {
            println!("{}: {}", reading.register, reading.value);
        }
    }
    Ok(())
}
