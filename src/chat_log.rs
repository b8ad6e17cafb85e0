//! Tailing a chat log and handing each parsed line to observers.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use encoding_rs::Encoding;
use tokio::fs::{File, OpenOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, ParseError, Result};
use crate::events::{self, FileWatch};
use crate::message::{Message, MessageKind};
use crate::observer::{Binding, Interest, Observer, ObserverId, ObserverRegistry, Selector};
use crate::parser::{MessageParser, ParserConfig};
use crate::reader::{open_linereader, LineReader, DEFAULT_CHUNK_LEN, DEFAULT_ENCODING};

/// Default time to wait between polls once the log has no new lines.
pub const DEFAULT_IDLE: Duration = Duration::from_millis(250);

/// Default time [`ChatLog::stop`] waits, on top of one idle interval, for the
/// tailing task before aborting it.
pub const DEFAULT_STOP_WAIT: Duration = Duration::from_secs(5);

/// Settings for a [`ChatLog`].
#[derive(Clone, Debug)]
pub struct ChatLogConfig {
    pub path: PathBuf,
    pub idle: Duration,
    /// Bytes requested per read of the log.
    pub chunk_len: usize,
    /// Encoding the log is written in; must be ASCII compatible.
    pub encoding: &'static Encoding,
    /// Wake up early on filesystem change events instead of only polling.
    pub watch: bool,
    pub parser: ParserConfig,
}

impl ChatLogConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ChatLogConfig {
            path: path.into(),
            idle: DEFAULT_IDLE,
            chunk_len: DEFAULT_CHUNK_LEN,
            encoding: DEFAULT_ENCODING,
            watch: true,
            parser: ParserConfig::default(),
        }
    }

    pub fn idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    pub fn chunk_len(mut self, chunk_len: usize) -> Self {
        self.chunk_len = chunk_len;
        self
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn parser(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Shared {
    path: PathBuf,
    idle: Duration,
    chunk_len: usize,
    encoding: &'static Encoding,
    watch: bool,
    parser: Mutex<MessageParser>,
    observers: RwLock<ObserverRegistry>,
    /// Id of the current run, `0` while stopped.
    run: AtomicU64,
    next_run: AtomicU64,
    task: tokio::sync::Mutex<Option<Running>>,
}

/// Follows a chat log as the client appends to it, parsing every new line
/// into a [`Message`] and notifying the registered observers.
///
/// `ChatLog` is a cheap handle; clones share the same tail, parser and
/// observers. Once every handle is dropped a running tail ends on its own.
///
/// Lines are read, parsed and dispatched one at a time on a single tokio task,
/// in file order.
#[derive(Clone)]
pub struct ChatLog {
    shared: Arc<Shared>,
}

impl fmt::Debug for ChatLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatLog")
            .field("path", &self.shared.path)
            .field("idle", &self.shared.idle)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ChatLog {
    pub fn new(config: ChatLogConfig) -> Self {
        let ChatLogConfig {
            path,
            idle,
            chunk_len,
            encoding,
            watch,
            parser,
        } = config;

        ChatLog {
            shared: Arc::new(Shared {
                path,
                idle,
                chunk_len,
                encoding,
                watch,
                parser: Mutex::new(parser.build()),
                observers: RwLock::new(ObserverRegistry::new()),
                run: AtomicU64::new(0),
                next_run: AtomicU64::new(1),
                task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// A chat log at `path` with default settings.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        ChatLog::new(ChatLogConfig::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn idle(&self) -> Duration {
        self.shared.idle
    }

    /// Returns `true` while the tailing task is running.
    pub fn is_alive(&self) -> bool {
        self.shared.run.load(Ordering::SeqCst) != 0
    }

    /// Creates the log if it does not exist yet. An existing log is left
    /// untouched.
    pub async fn soft_touch(&self) -> io::Result<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)
            .await?;

        Ok(())
    }

    /// Starts tailing from the current end of the log. Does nothing if
    /// already running.
    pub async fn start(&self) -> Result<()> {
        self.run(true).await
    }

    /// Starts tailing from the beginning of the log, so existing lines are
    /// dispatched too. Does nothing if already running.
    pub async fn replay(&self) -> Result<()> {
        self.run(false).await
    }

    async fn run(&self, seek_to_end: bool) -> Result<()> {
        let mut task = self.shared.task.lock().await;

        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() {
                return Ok(());
            }
        }
        *task = None;

        self.soft_touch().await?;

        let reader = open_linereader(
            &self.shared.path,
            self.shared.encoding,
            self.shared.chunk_len,
            seek_to_end,
        )
        .await?;

        let file_watch = if self.shared.watch {
            match FileWatch::new(&self.shared.path) {
                Ok(file_watch) => Some(file_watch),
                Err(err) => {
                    tracing::warn!(
                        path = %self.shared.path.display(),
                        "Failed to watch chat log, polling only: {}",
                        err
                    );
                    None
                }
            }
        } else {
            None
        };

        let (shutdown, shutdown_rx) = watch::channel(false);

        let run = self.shared.next_run.fetch_add(1, Ordering::SeqCst);
        self.shared.run.store(run, Ordering::SeqCst);

        let handle = tokio::spawn(tail(
            RunGuard {
                shared: Arc::downgrade(&self.shared),
                run,
            },
            reader,
            file_watch,
            shutdown_rx,
        ));

        *task = Some(Running { shutdown, handle });

        tracing::debug!(path = %self.shared.path.display(), seek_to_end, "Started tailing chat log");

        Ok(())
    }

    /// Stops tailing, waiting up to one idle interval plus `wait` for the
    /// task to finish before aborting it. Does nothing if not running.
    ///
    /// A line that was only partially read is dropped, and the log is closed.
    /// An aborted task that is busy in an observer ends once that observer
    /// returns; `stop` does not wait for it.
    pub async fn stop(&self, wait: Duration) {
        let mut task = self.shared.task.lock().await;

        self.shared.run.store(0, Ordering::SeqCst);

        let Some(Running {
            shutdown,
            mut handle,
        }) = task.take()
        else {
            return;
        };

        // The task may already be gone, which is fine.
        let _ = shutdown.send(true);

        match tokio::time::timeout(self.shared.idle + wait, &mut handle).await {
            Ok(Ok(())) => {
                tracing::debug!(path = %self.shared.path.display(), "Stopped tailing chat log");
            }
            Ok(Err(err)) => {
                tracing::warn!(path = %self.shared.path.display(), "Tailing task failed: {}", err);
            }
            Err(_) => {
                tracing::warn!(
                    path = %self.shared.path.display(),
                    "Tailing task did not stop in time, aborting"
                );
                handle.abort();
            }
        }
    }

    fn parser(&self) -> MutexGuard<'_, MessageParser> {
        self.shared
            .parser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Parses `line` with this log's parser, advancing its state.
    pub fn parse(&self, line: &str) -> std::result::Result<Message, ParseError> {
        self.parser().parse(line)
    }

    pub fn namelen(&self) -> Option<usize> {
        self.parser().namelen()
    }

    pub fn set_namelen(&self, namelen: Option<usize>) {
        self.parser().set_namelen(namelen);
    }

    pub fn is_strict(&self) -> bool {
        self.parser().is_strict()
    }

    pub fn set_strict(&self, strict: bool) {
        self.parser().set_strict(strict);
    }

    /// Notes that `command` was just sent in `scope`; see
    /// [`MessageParser::record_command`].
    pub fn record_command(&self, scope: MessageKind, command: impl Into<String>) {
        self.parser().record_command(scope, command);
    }

    fn observers(&self) -> std::sync::RwLockWriteGuard<'_, ObserverRegistry> {
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a single observer, such as a closure taking
    /// `(&ChatLog, &Message)`.
    pub fn add_observer<O>(&self, interest: Interest, observer: O) -> ObserverId
    where
        O: Observer + 'static,
    {
        self.observers().add(interest, Arc::new(observer))
    }

    /// Registers an object together with the methods to call on it.
    pub fn add_binding<T>(&self, interest: Interest, binding: Binding<T>) -> ObserverId
    where
        T: Send + Sync + 'static,
    {
        self.observers().add_binding(interest, binding)
    }

    /// Registers several objects with the same method.
    pub fn add_observers<T, I>(&self, interest: Interest, objects: I, selector: Selector<T>) -> Result<Vec<ObserverId>>
    where
        T: Send + Sync + 'static,
        I: IntoIterator<Item = Arc<T>>,
    {
        let objects = objects.into_iter().collect::<Vec<_>>();

        if objects.is_empty() {
            return Err(Error::NoObserver);
        }

        Ok(self.observers().add_objects(interest, objects, selector))
    }

    /// Counts observers for `interest`, or all of them for `None`.
    pub fn count_observers(&self, interest: Option<&Interest>) -> usize {
        self.shared
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .count(interest)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers().remove(id)
    }

    /// Removes every registration of `object`, optionally only for
    /// `interest`.
    pub fn remove_observers_of<T: ?Sized>(&self, object: &Arc<T>, interest: Option<&Interest>) -> usize {
        self.observers().remove_object(object, interest)
    }

    /// Removes all observers for `interest`, or every observer for `None`.
    pub fn clear_observers(&self, interest: Option<&Interest>) {
        self.observers().clear(interest);
    }

    /// Hands `message` to the observers interested in any kind, then to
    /// those interested in its kind, each in registration order.
    pub fn notify_observers(&self, message: &Message) {
        let kind = message.kind();
        let observers = self
            .shared
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(&kind);

        for (id, observer) in observers {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.notify(self, message))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(%id, %kind, "Observer failed: {}", err);
                }
                Err(_) => {
                    tracing::error!(%id, %kind, "Observer panicked");
                }
            }
        }
    }

    fn parse_for_dispatch(&self, line: &str) -> Message {
        let parsed = self.parser().parse(line);

        parsed.unwrap_or_else(|err| {
            tracing::warn!(path = %self.shared.path.display(), "{}", err);
            Message::unknown(line)
        })
    }

    /// Dispatches every line currently available. Returns `false` once a
    /// stop has been requested.
    async fn drain_lines(&self, reader: &mut LineReader<File>, shutdown: &watch::Receiver<bool>) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }

            match reader.next_line().await {
                Ok(Some(line)) => {
                    let message = self.parse_for_dispatch(&line);
                    self.notify_observers(&message);
                }
                Ok(None) => return true,
                Err(err) => {
                    // Retried after the next idle interval.
                    tracing::warn!(path = %self.shared.path.display(), "Failed to read chat log: {}", err);
                    return true;
                }
            }
        }
    }
}

/// Marks its run as ended when the tailing task finishes for any reason,
/// including a panic or an abort.
struct RunGuard {
    shared: Weak<Shared>,
    run: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            // A newer run may have replaced this one already.
            let _ = shared
                .run
                .compare_exchange(self.run, 0, Ordering::SeqCst, Ordering::SeqCst);
        }
    }
}

async fn tail(
    guard: RunGuard,
    mut reader: LineReader<File>,
    mut file_watch: Option<FileWatch>,
    mut shutdown: watch::Receiver<bool>,
) {
    let shared = &guard.shared;

    loop {
        let idle = {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let chat_log = ChatLog { shared };

            if !chat_log.drain_lines(&mut reader, &shutdown).await {
                break;
            }

            chat_log.shared.idle
        };

        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(idle) => {}
            _ = events::changed(&mut file_watch) => {}
        }
    }

    if let Some(shared) = shared.upgrade() {
        tracing::trace!(path = %shared.path.display(), "Tailing task exiting");
    }
}
