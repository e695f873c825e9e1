use std::ops::ControlFlow;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::Result;
use link::{LinkDelegate, LinkHandle, LinkState};
use thiserror::Error;

use crate::input::{StickInput, Sticks, SticksError};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConsoleCommand {
    Connect,
    Disconnect,
    Status,
    /// Centre the sticks and cut the throttle.
    Stop,
    Quit,
    /// `yaw on` / `yaw off`, applied from the next frame.
    Yaw(bool),
    Sticks(Sticks),
    /// Blank line, keep flying the last sample.
    Hold,
}

#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("expected `yaw on` or `yaw off`, got `yaw {0}`")]
    Yaw(String),
    #[error(transparent)]
    Sticks(#[from] SticksError),
}

impl FromStr for ConsoleCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        if let Some(setting) = line.strip_prefix("yaw ") {
            return match setting.trim() {
                "on" => Ok(ConsoleCommand::Yaw(true)),
                "off" => Ok(ConsoleCommand::Yaw(false)),
                other => Err(CommandError::Yaw(other.to_string())),
            }
        }

        Ok(match line {
            "" => ConsoleCommand::Hold,
            "connect" | "c" => ConsoleCommand::Connect,
            "disconnect" | "d" => ConsoleCommand::Disconnect,
            "status" | "s" => ConsoleCommand::Status,
            "stop" => ConsoleCommand::Stop,
            "quit" | "q" | "exit" => ConsoleCommand::Quit,
            "yaw" => return Err(CommandError::Yaw(String::new())),
            sticks => ConsoleCommand::Sticks(sticks.parse()?),
        })
    }
}

pub struct OperatorInterface {
    link: LinkHandle,
    input: Arc<StickInput>,
    /// Shared with the link controller, which reads it every tick.
    yaw: Arc<AtomicBool>,
}

impl OperatorInterface {
    pub fn new(link: LinkHandle, input: Arc<StickInput>, yaw: Arc<AtomicBool>) -> Self {
        Self { link, input, yaw }
    }

    pub async fn handle_line(&mut self, line: &str) -> Result<ControlFlow<()>> {
        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) => {
                Banner::Warning(e.to_string()).show();
                return Ok(ControlFlow::Continue(()))
            }
        };

        match command {
            ConsoleCommand::Connect => {
                let outcome = self.link.connect(None).await?;
                println!("connect: {:?}", outcome);
            }
            ConsoleCommand::Disconnect => self.link.disconnect().await?,
            ConsoleCommand::Status => {
                let status = self.link.status().await?;
                println!("state: {:?}, dispatching: {}, frames sent: {}, yaw: {}, sticks: {:?}",
                    status.state, status.dispatching, status.frames_sent,
                    on_off(self.yaw.load(Ordering::Relaxed)), self.input.current());
            }
            ConsoleCommand::Yaw(enabled) => {
                self.yaw.store(enabled, Ordering::Relaxed);
                log::info!("Yaw control {}", on_off(enabled));
                println!("yaw: {}", on_off(enabled));
            }
            ConsoleCommand::Stop => self.input.update(Sticks::default()),
            ConsoleCommand::Sticks(sticks) => self.input.update(sticks),
            ConsoleCommand::Hold => {}
            ConsoleCommand::Quit => return Ok(ControlFlow::Break(())),
        }

        Ok(ControlFlow::Continue(()))
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

/// Prints link events for the pilot.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleDelegate;

impl LinkDelegate for ConsoleDelegate {
    fn did_update(&mut self, state: LinkState) {
        log::info!("Link state changed to {:?}", state);
        println!("link: {:?}", state);
    }

    fn did_fail(&mut self, title: &str, message: Option<&str>) {
        let text = match message {
            Some(message) => format!("{}: {}", title, message),
            None => title.to_string(),
        };
        Banner::Error(text).show();
    }
}

#[derive(Debug)]
enum Banner {
    Warning(String),
    Error(String),
}

impl Banner {
    fn show(&self) {
        match self {
            Banner::Warning(e) => eprintln!("Warning: {}", e),
            Banner::Error(e) => eprintln!("Critical Error: {}", e),
        }
    }
}
