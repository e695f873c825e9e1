mod input;
mod oi;
mod settings;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use eyre::{Result, WrapErr};
use link::{LinkController, UdpLink, UdpLinkConfig};
use tokio::io::{AsyncBufReadExt, BufReader};

use input::StickInput;
use oi::{ConsoleDelegate, OperatorInterface};
use settings::Preferences;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
/// Pilot console for a Wi-Fi quadrotor.
///
/// Type `roll pitch yaw thrust` (sticks in [-1, 1], thrust in [0, 1]) to fly,
/// or one of `connect`, `disconnect`, `status`, `stop`, `yaw on|off`, `quit`.
struct Args {
    /// Vehicle endpoint that receives command frames
    #[arg(short, long, default_value_t = link::udp::DEVICE_ADDR)]
    device: SocketAddr,

    /// Local UDP port to bind for replies from the vehicle
    #[arg(short, long, default_value_t = link::udp::APP_PORT)]
    local_port: u16,

    /// Pilot preferences file (JSON). A missing file means defaults
    #[arg(short, long, default_value = "pilot.json")]
    settings: PathBuf,

    /// Force yaw control off regardless of the preferences file
    #[arg(long)]
    no_yaw: bool,

    /// Connect as soon as the console starts
    #[arg(short, long)]
    connect: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut preferences = Preferences::load(&args.settings)?;
    if args.no_yaw {
        preferences.yaw_enabled = false;
    }
    log::debug!("Flying with {:?}", preferences);

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("Asynchronous runtime construction failed")?
        .block_on(run(args, Arc::new(preferences)))
}

async fn run(args: Args, preferences: Arc<Preferences>) -> Result<()> {
    let transport = UdpLink::new(UdpLinkConfig {
        device: args.device,
        local_port: args.local_port,
        ..UdpLinkConfig::default()
    });
    // the console can flip this while flying
    let yaw = Arc::new(AtomicBool::new(preferences.yaw_enabled));
    let link = LinkController::spawn(transport, yaw.clone(), ConsoleDelegate);

    let input = Arc::new(StickInput::new(preferences));
    link.set_input_source(Some(input.clone()))?;
    let mut oi = OperatorInterface::new(link.clone(), input, yaw);

    if args.connect {
        oi.handle_line("connect").await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.wrap_err("Failed to read pilot input")? else {
                    log::info!("Input closed");
                    break
                };
                if oi.handle_line(&line).await?.is_break() {
                    break
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.wrap_err("Failed to listen for Ctrl-C")?;
                log::info!("Interrupted");
                break
            }
        }
    }

    link.shutdown().await
        .wrap_err("Link controller stopped unexpectedly")?;
    return Ok(());
}
