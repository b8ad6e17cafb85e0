//! A library providing asynchronous tailing and parsing of game chat logs.
//!
//! The client appends every chat line it shows to a log file. [`ChatLog`]
//! follows that file, turns each new line into a [`Message`] and hands it to
//! the registered observers, either for every kind of message or only for
//! the kinds they asked for.
//!
//! ## Example
//!
//! ```no_run
//! use chatmux::{ChatLog, Message, MessageKind, ObserverResult};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> chatmux::Result<()> {
//!     let chat_log = ChatLog::open("logs/chat.log");
//!
//!     chat_log.add_observer(
//!         MessageKind::Kill.into(),
//!         |_: &ChatLog, message: &Message| -> ObserverResult {
//!             println!("kill: {}", message.line());
//!             Ok(())
//!         },
//!     );
//!
//!     chat_log.start().await?;
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     chat_log.stop(chatmux::DEFAULT_STOP_WAIT).await;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Caveats
//!
//! Lines are located on raw bytes before decoding, so the log's encoding must
//! be ASCII compatible. The default is Windows-1252, which is what the client
//! writes.
//!
//! Observers run one after another on the tailing task. An observer that
//! blocks holds up every later line.

mod chat_log;
mod error;
mod events;
mod file;
mod message;
mod observer;
mod parser;
mod reader;

pub use chat_log::{ChatLog, ChatLogConfig, DEFAULT_IDLE, DEFAULT_STOP_WAIT};
pub use encoding_rs;
pub use error::{Error, ParseError, Result};
pub use file::ChatLogFile;
pub use message::{
    ChatMessage, CustomMessage, FindResult, KillMessage, LogType, Message, MessageData,
    MessageKind, PlayerMessage, QueryFindMessage, QueryLogMessage, QueryNamelenMessage,
    RemoteMessage, MAX_NAMELEN,
};
pub use observer::{
    Binding, Interest, Observer, ObserverError, ObserverId, ObserverRegistry, ObserverResult,
    Selector,
};
pub use parser::{
    CustomPattern, FindTemplates, MessageParser, ParserConfig, DEFAULT_HISTORY_WINDOW,
    FIND_COMMAND, NAMELEN_LIMIT, SQUAD_MARKER,
};
pub use reader::{LineReader, DEFAULT_CHUNK_LEN, DEFAULT_ENCODING};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
