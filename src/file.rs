//! Parsing a finished chat log from start to end.

use std::path::Path;

use encoding_rs::Encoding;
use futures_util::stream::{self, Stream};
use tokio::fs::File;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::message::Message;
use crate::parser::{MessageParser, ParserConfig};
use crate::reader::{open_linereader, LineReader, DEFAULT_CHUNK_LEN, DEFAULT_ENCODING};

/// Reads and parses a chat log that is not being written to, such as one
/// saved by an earlier session.
///
/// Unlike [`ChatLog`](crate::ChatLog) this does not wait for more data: at the
/// end of the stream a final unterminated line is returned as is.
pub struct ChatLogFile<R = File> {
    reader: LineReader<R>,
    parser: MessageParser,
}

impl ChatLogFile<File> {
    /// Opens `path` with the default encoding and parser settings.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        ChatLogFile::open_with(path, DEFAULT_ENCODING, ParserConfig::default()).await
    }

    pub async fn open_with(
        path: impl AsRef<Path>,
        encoding: &'static Encoding,
        parser: ParserConfig,
    ) -> Result<Self> {
        let reader = open_linereader(path, encoding, DEFAULT_CHUNK_LEN, false).await?;

        Ok(ChatLogFile::new(reader, parser.build()))
    }
}

impl<R: AsyncRead + Unpin> ChatLogFile<R> {
    pub fn new(reader: LineReader<R>, parser: MessageParser) -> Self {
        ChatLogFile { reader, parser }
    }

    pub fn parser(&self) -> &MessageParser {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut MessageParser {
        &mut self.parser
    }

    /// Returns the next raw line, or `None` at the end of the stream.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        match self.reader.next_line().await? {
            Some(line) => Ok(Some(line)),
            None => Ok(self.reader.drain()),
        }
    }

    /// Returns the next line parsed, or `None` at the end of the stream.
    pub async fn parse_line(&mut self) -> Result<Option<Message>> {
        match self.read_line().await? {
            Some(line) => Ok(Some(self.parser.parse(&line)?)),
            None => Ok(None),
        }
    }

    /// Turns the remaining lines into a stream of messages. The stream ends
    /// after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Message>> {
        stream::unfold(Some(self), |state| async move {
            let mut file = state?;

            match file.parse_line().await {
                Ok(Some(message)) => Some((Ok(message), Some(file))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}
