mod tally;

use std::io;
use std::net::SocketAddr;

use async_signal::{Signal, Signals};
use clap::Parser;
use eyre::{Result, WrapErr};
use futures_lite::{future, StreamExt};

use tally::Tally;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
/// Stands in for the quadrotor: receives command frames, checks them, and
/// reports what it would have flown.
struct Args {
    /// Address to listen for command frames on
    #[arg(short, long, default_value = "0.0.0.0:2390")]
    listen: String,

    /// Print every decoded command as a JSON line on stdout
    #[arg(short, long)]
    json: bool,
}

enum Event {
    Datagram(io::Result<(usize, SocketAddr)>),
    Signal(Option<io::Result<Signal>>),
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    smol::block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let socket = smol::net::UdpSocket::bind(args.listen.as_str()).await
        .wrap_err_with(|| format!("Failed to bind {}", args.listen))?;
    log::info!("Listening for command frames on {}", socket.local_addr()?);

    let mut signals = Signals::new([Signal::Int, Signal::Term])
        .wrap_err("Failed to register signal handlers")?;
    let mut tally = Tally::default();
    let mut buf = [0u8; 64];

    loop {
        let event = future::or(
            async { Event::Datagram(socket.recv_from(&mut buf).await) },
            async { Event::Signal(signals.next().await) },
        ).await;

        match event {
            Event::Datagram(Ok((len, from))) => match tally.record(&buf[..len]) {
                Ok(packet) => {
                    log::debug!("{} -> {:?}", from, packet);
                    if args.json {
                        println!("{}", serde_json::to_string(&packet)?);
                    }
                }
                Err(e) => log::warn!("Rejected {} byte datagram from {}: {}", len, from, e),
            },
            Event::Datagram(Err(e)) => log::warn!("Receive failed: {}", e),
            Event::Signal(signal) => {
                log::info!("Stopping on {:?}", signal);
                break
            }
        }
    }

    eprintln!("{}", tally);
    return Ok(())
}
