//! genlink demo
//!
//! Polls a few generator registers through a serial-over-TCP gateway until
//! Ctrl-C, then prints the communication statistics.
//!
//! Usage: cargo run --features demo --bin demo [gateway_address] [slave_address]
//! Example: RUST_LOG=genlink=debug cargo run --features demo --bin demo 192.168.1.40:8899 9d

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use genlink::{MasterConfig, ModbusError, ModbusMaster};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Registers to poll with their word counts.
const POLLED_REGISTERS: &[(u16, u16)] = &[(0x0001, 2), (0x0005, 1), (0x000A, 1), (0x0012, 1)];

const POLL_PERIOD: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let gateway: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:8899".to_string())
        .parse()?;
    let slave = match args.next() {
        Some(text) => u8::from_str_radix(text.trim_start_matches("0x"), 16)?,
        None => genlink::config::DEFAULT_SLAVE_ADDRESS,
    };

    println!("{}", genlink::info());

    let config = MasterConfig::new()
        .with_slave_address(slave)
        .with_packet_logging(std::env::var_os("GENLINK_PACKETS").is_some());
    let master = Arc::new(ModbusMaster::connect_tcp(gateway, config).await?);
    info!(
        "Polling slave {:02x} at {} (response timeout {:?})",
        slave,
        gateway,
        master.response_timeout()
    );

    let poller = {
        let master = master.clone();
        tokio::spawn(async move {
            if let Err(e) = master.flush().await {
                warn!("Initial flush failed: {}", e);
            }
            while !master.is_stopping() {
                for &(register, count) in POLLED_REGISTERS {
                    match master.read_registers(register, count).await {
                        Ok(value) => info!("{:04x} = {}", register, value),
                        Err(ModbusError::Stopping) => return,
                        Err(e) if e.is_fatal() => {
                            warn!("Giving up: {}", e);
                            return;
                        }
                        Err(_) => {}
                    }
                }
                tokio::select! {
                    () = master.stop_token().cancelled() => return,
                    () = tokio::time::sleep(POLL_PERIOD) => {}
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    master.close().await?;
    poller.await?;

    println!("\nRegister cache:");
    for (register, value) in master.register_cache().snapshot() {
        println!("  {}: {}", register, value);
    }
    println!();
    print!("{}", master.comm_stats());

    Ok(())
}
