//! Everything related to framing a byte stream into lines.

use std::io::{self, SeekFrom};
use std::path::Path;

use encoding_rs::{Encoding, WINDOWS_1252};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Default number of bytes requested from the underlying stream per read.
pub const DEFAULT_CHUNK_LEN: usize = 520;

/// Encoding the game client writes its chat log in.
pub const DEFAULT_ENCODING: &Encoding = WINDOWS_1252;

/// Opens `path` for reading lines, optionally positioned at its current end.
pub(crate) async fn open_linereader(
    path: impl AsRef<Path>,
    encoding: &'static Encoding,
    chunk_len: usize,
    seek_to_end: bool,
) -> io::Result<LineReader<File>> {
    let file = File::open(path.as_ref()).await?;
    let mut reader = LineReader::with_encoding(file, encoding)?.chunk_len(chunk_len);

    if seek_to_end {
        reader.seek_to_end().await?;
    }

    Ok(reader)
}

/// Reads "universal" lines from a stream that is still being appended to.
///
/// Any of `\r\n`, `\r` or `\n` ends a line, and a single stream may mix them.
/// Bytes after the last terminator are kept until a later read completes the
/// line, so reads that split a line (or a `\r\n` pair) lose nothing. Each line
/// is decoded from the source encoding with malformed sequences replaced by
/// U+FFFD.
pub struct LineReader<R> {
    inner: R,
    encoding: &'static Encoding,
    chunk: Box<[u8]>,
    /// Bytes read but not yet returned as part of a line.
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no terminator.
    scanned: usize,
    /// A line was ended by a `\r` with nothing after it yet, so a `\n`
    /// arriving next belongs to that same terminator.
    skip_lf: bool,
}

impl<R> LineReader<R> {
    /// Wraps `inner`, decoding with [`DEFAULT_ENCODING`].
    pub fn new(inner: R) -> Self {
        LineReader {
            inner,
            encoding: DEFAULT_ENCODING,
            chunk: vec![0; DEFAULT_CHUNK_LEN].into_boxed_slice(),
            pending: Vec::new(),
            scanned: 0,
            skip_lf: false,
        }
    }

    /// Wraps `inner`, decoding with `encoding`.
    ///
    /// Returns `io::ErrorKind::InvalidInput` if `encoding` is not ASCII
    /// compatible, since line terminators are located on raw bytes.
    pub fn with_encoding(inner: R, encoding: &'static Encoding) -> io::Result<Self> {
        if !encoding.is_ascii_compatible() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Encoding {} is not ASCII compatible", encoding.name()),
            ));
        }

        let mut reader = LineReader::new(inner);
        reader.encoding = encoding;

        Ok(reader)
    }

    /// Sets how many bytes are requested per read. Zero is treated as one.
    pub fn chunk_len(mut self, len: usize) -> Self {
        self.chunk = vec![0; len.max(1)].into_boxed_slice();
        self
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Returns `true` if bytes of an unterminated line are being held.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Returns the held unterminated bytes as a final line, if there are any.
    ///
    /// Only meant for a stream that is known to be finished; while the stream
    /// is live those bytes are still waiting for their terminator.
    pub fn drain(&mut self) -> Option<String> {
        self.skip_lf = false;
        self.scanned = 0;

        if self.pending.is_empty() {
            return None;
        }

        let line = self.decode(&self.pending);
        self.pending.clear();

        Some(line)
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let (text, _had_errors) = self.encoding.decode_without_bom_handling(bytes);
        text.into_owned()
    }

    fn take_line(&mut self, end: usize, consumed: usize) -> String {
        let line = self.decode(&self.pending[..end]);
        self.pending.drain(..consumed);
        self.scanned = 0;

        line
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    async fn fill(&mut self) -> io::Result<usize> {
        let n = self.inner.read(&mut self.chunk).await?;
        self.pending.extend_from_slice(&self.chunk[..n]);

        Ok(n)
    }

    /// Returns the next complete line without its terminator, or `None` if
    /// the stream has no complete line available right now.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if self.skip_lf && !self.pending.is_empty() {
                if self.pending[0] == b'\n' {
                    self.pending.remove(0);
                }
                self.skip_lf = false;
            }

            let found = self.pending[self.scanned..]
                .iter()
                .position(|&b| b == b'\n' || b == b'\r')
                .map(|i| i + self.scanned);

            match found {
                Some(i) if self.pending[i] == b'\n' => {
                    return Ok(Some(self.take_line(i, i + 1)));
                }
                Some(i) if i + 1 < self.pending.len() => {
                    let consumed = if self.pending[i + 1] == b'\n' { i + 2 } else { i + 1 };
                    return Ok(Some(self.take_line(i, consumed)));
                }
                Some(i) => {
                    // Trailing `\r`: look ahead for a `\n` before deciding.
                    self.scanned = i;

                    if self.fill().await? == 0 {
                        self.skip_lf = true;
                        return Ok(Some(self.take_line(i, i + 1)));
                    }
                }
                None => {
                    self.scanned = self.pending.len();

                    if self.fill().await? == 0 {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl<R: AsyncRead + AsyncSeek + Unpin> LineReader<R> {
    /// Moves to the current end of the stream, dropping any held partial line.
    pub async fn seek_to_end(&mut self) -> io::Result<u64> {
        let pos = self.inner.seek(SeekFrom::End(0)).await?;

        self.pending.clear();
        self.scanned = 0;
        self.skip_lf = false;

        Ok(pos)
    }
}
