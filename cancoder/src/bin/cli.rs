//! Interactive bench CLI.
//!
//! Connects one CAN source, decodes traffic with a built-in profile and
//! prints decoded events. Stdin accepts simple commands for poking the bus:
//! `help`, and `<arbid-hex>:<data-hex>` to send a raw frame.

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use cancoder::tables;
use cancoder::transport::SerialConfig;
use cancoder::{CanBus, Forwarder, ForwarderHandle, Frame};

#[derive(Parser)]
#[command(name = "cancoder-cli", about = "Read and decode CAN traffic from a bench source")]
struct Args {
    /// CAN network interface, serial tty, or TCP host to connect
    #[arg(long, default_value = "can0")]
    device: String,

    /// Decoding profile applied to incoming frames
    #[arg(long, default_value = "Opel_Astra_H_OPC_2006")]
    parser: String,

    /// TCP source port; a value > 0 selects the TCP source
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Serial baud rate; a value > 0 selects the serial source
    #[arg(long, default_value_t = 0)]
    baud: u32,

    /// Debug logging
    #[arg(long)]
    verbose: bool,

    /// Print frames that decode to nothing as well
    #[arg(long)]
    raw: bool,

    /// Render raw payload bytes as text
    #[arg(long)]
    utf8: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cancoder::tracing::init(args.verbose);

    println!("available decoding profiles:");
    for profile in tables::builtin() {
        println!("\t-{}", profile.name);
    }

    let profile = tables::find(&args.parser)
        .ok_or_else(|| anyhow!("unknown decoding profile `{}`", args.parser))?;
    let bus_table = profile
        .buses
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("profile `{}` has no buses", args.parser))?;

    let bus = if args.port > 0 {
        CanBus::tcp(&args.device, args.port)
    } else if args.baud > 0 {
        CanBus::serial(&args.device, SerialConfig::with_baud(args.baud))
    } else {
        CanBus::kernel(&args.device)
    };

    let forwarder = Forwarder::new(bus, bus_table.table);
    let mut events = forwarder.subscribe();
    let mut raw_rx = args.raw.then(|| forwarder.subscribe_raw());

    let handle = forwarder.start().await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut clean_exit = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    println!("rx[decoded]: [{}]: {}{}", event.name, event.value, event.unit);
                }
                None => {
                    eprintln!("receive stream ended");
                    clean_exit = false;
                    break;
                }
            },
            frame = recv_raw(&mut raw_rx), if raw_rx.is_some() => match frame {
                Some(frame) => {
                    if args.utf8 {
                        let text = String::from_utf8_lossy(frame.payload()).into_owned();
                        println!("rx[encoded]: {frame} |{text}|");
                    } else {
                        println!("rx[encoded]: {frame}");
                    }
                }
                None => raw_rx = None,
            },
            line = stdin.next_line() => match line? {
                Some(line) => {
                    if !run_command(line.trim(), &handle).await {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    handle.shutdown();
    handle.join().await;

    if !clean_exit {
        bail!("transport failed");
    }
    Ok(())
}

async fn recv_raw(rx: &mut Option<mpsc::Receiver<Frame>>) -> Option<Frame> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

/// Execute one stdin command. Returns `false` when the session should end.
async fn run_command(line: &str, handle: &ForwarderHandle) -> bool {
    match line {
        "" => {}
        "quit" | "exit" => return false,
        "help" => {
            println!("commands:");
            println!("  help                      this text");
            println!("  <arbid-hex>:<data-hex>    send a raw frame, e.g. 208:024000");
            println!("  quit                      disconnect and exit");
        }
        other => match parse_send(other) {
            Ok(frame) => {
                if let Err(err) = handle.send_raw(frame).await {
                    eprintln!("send failed: {err}");
                }
            }
            Err(err) => eprintln!("{err} (try `help`)"),
        },
    }
    true
}

fn parse_send(line: &str) -> Result<Frame> {
    let (id_text, data_text) = line
        .split_once(':')
        .ok_or_else(|| anyhow!("unknown command `{line}`"))?;
    let arbitration_id = u32::from_str_radix(id_text.trim(), 16)
        .map_err(|err| anyhow!("arbitration id `{id_text}`: {err}"))?;
    let payload =
        hex::decode(data_text.trim()).map_err(|err| anyhow!("data `{data_text}`: {err}"))?;
    Ok(Frame::new(arbitration_id, &payload)?)
}
