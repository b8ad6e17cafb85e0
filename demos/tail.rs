//! Prints every message appended to a chat log.
//!
//! Usage:
//!     tail /path/to/chat.log [seconds]
//!
//! Tails until the given number of seconds has passed (default 60). Set
//! `RUST_LOG=chatmux=debug` to see what the tail is doing.

use std::time::Duration;

use chatmux::{ChatLog, Interest, Message, ObserverResult};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("chatmux=info".parse()?))
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or("missing path to chat log")?;
    let seconds = match args.next() {
        Some(seconds) => seconds.parse()?,
        None => 60,
    };

    let chat_log = ChatLog::open(path);

    chat_log.add_observer(Interest::Any, |_: &ChatLog, message: &Message| -> ObserverResult {
        println!("{:>9} {:?}", message.kind(), message.data());
        Ok(())
    });

    chat_log.start().await?;
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    chat_log.stop(chatmux::DEFAULT_STOP_WAIT).await;

    Ok(())
}
