use chatmux::{
    ChatLog, ChatLogConfig, Interest, Message, MessageData, MessageKind, ObserverResult,
    ParserConfig, FIND_COMMAND,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time;

const IDLE: Duration = Duration::from_millis(20);
const TIMEOUT_2_SEC: Duration = Duration::from_millis(2000);

fn append(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
}

fn polling(path: &Path) -> ChatLogConfig {
    ChatLogConfig::new(path).idle(IDLE).watch(false)
}

fn subscribe(chat_log: &ChatLog, interest: Interest) -> UnboundedReceiver<Message> {
    let (tx, rx) = unbounded_channel();
    chat_log.add_observer(interest, move |_: &ChatLog, message: &Message| -> ObserverResult {
        tx.send(message.clone())?;
        Ok(())
    });
    rx
}

async fn next(rx: &mut UnboundedReceiver<Message>) -> Message {
    time::timeout(TIMEOUT_2_SEC, rx.recv())
        .await
        .expect("Timed out waiting for message")
        .expect("Observer channel closed")
}

async fn assert_quiet(rx: &mut UnboundedReceiver<Message>) {
    time::sleep(IDLE * 10).await;
    assert!(rx.try_recv().is_err(), "Unexpected message");
}

#[tokio::test]
pub async fn test_tail_new_lines() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");

    let chat_log = ChatLog::new(polling(&logfile));
    let mut rx = subscribe(&chat_log, Interest::Any);

    // The log does not exist yet; starting creates it.
    chat_log.start().await.unwrap();
    assert!(chat_log.is_alive());
    assert!(logfile.exists());

    append(&logfile, b"E Alice> gg\r\n  Bob(42) killed by: Carol\nP :Dave:he");
    assert_eq!(next(&mut rx).await.kind(), MessageKind::Freq);
    assert_eq!(next(&mut rx).await.kind(), MessageKind::Kill);
    assert_quiet(&mut rx).await;

    append(&logfile, b"y\n");
    let message = next(&mut rx).await;
    assert_eq!(message.line(), "P :Dave:hey");
    assert_eq!(message.kind(), MessageKind::Remote);

    chat_log.stop(Duration::from_secs(1)).await;
    assert!(!chat_log.is_alive());
}

#[tokio::test]
pub async fn test_start_skips_existing_lines() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");
    append(&logfile, b"  Old> history\n");

    let chat_log = ChatLog::new(polling(&logfile));
    let mut rx = subscribe(&chat_log, Interest::Any);

    chat_log.start().await.unwrap();
    append(&logfile, b"  New> line\n");

    assert_eq!(next(&mut rx).await.name(), Some("New"));
    chat_log.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
pub async fn test_replay_reads_existing_lines() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");
    append(&logfile, b"  Old> history\n");

    let chat_log = ChatLog::new(polling(&logfile));
    let mut rx = subscribe(&chat_log, Interest::Any);

    chat_log.replay().await.unwrap();
    append(&logfile, b"  New> line\n");

    assert_eq!(next(&mut rx).await.name(), Some("Old"));
    assert_eq!(next(&mut rx).await.name(), Some("New"));
    chat_log.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
pub async fn test_start_twice_is_noop() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");

    let chat_log = ChatLog::new(polling(&logfile));
    let mut rx = subscribe(&chat_log, Interest::Any);

    let other = chat_log.clone();
    let (first, second) = tokio::join!(chat_log.start(), other.start());
    first.unwrap();
    second.unwrap();

    append(&logfile, b"T Tim> once\n");
    assert_eq!(next(&mut rx).await.kind(), MessageKind::Team);
    assert_quiet(&mut rx).await;

    chat_log.stop(Duration::from_secs(1)).await;
    chat_log.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
pub async fn test_restart_resumes_at_end() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");

    let chat_log = ChatLog::new(polling(&logfile));
    let mut rx = subscribe(&chat_log, Interest::Any);

    chat_log.start().await.unwrap();
    chat_log.stop(Duration::from_secs(1)).await;

    append(&logfile, b"  Missed> while stopped\n");

    chat_log.start().await.unwrap();
    append(&logfile, b"  Seen> after restart\n");

    assert_eq!(next(&mut rx).await.name(), Some("Seen"));
    chat_log.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
pub async fn test_any_before_kind() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");

    let chat_log = ChatLog::new(polling(&logfile));
    let (tx, mut rx) = unbounded_channel();
    let pub_tx = tx.clone();

    chat_log.add_observer(MessageKind::Pub.into(), move |_: &ChatLog, _: &Message| -> ObserverResult {
        pub_tx.send("pub")?;
        Ok(())
    });
    chat_log.add_observer(Interest::Any, move |_: &ChatLog, _: &Message| -> ObserverResult {
        tx.send("any")?;
        Ok(())
    });

    chat_log.start().await.unwrap();
    append(&logfile, b"  Bob> hi\n");

    let first = time::timeout(TIMEOUT_2_SEC, rx.recv()).await.unwrap();
    let second = time::timeout(TIMEOUT_2_SEC, rx.recv()).await.unwrap();
    assert_eq!((first, second), (Some("any"), Some("pub")));

    chat_log.stop(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
pub async fn test_failing_observer_keeps_tailing() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");

    let chat_log = ChatLog::new(polling(&logfile));
    chat_log.add_observer(Interest::Any, |_: &ChatLog, _: &Message| -> ObserverResult {
        Err("always fails".into())
    });
    let mut rx = subscribe(&chat_log, Interest::Any);

    chat_log.start().await.unwrap();
    append(&logfile, b"  A> 1\n  B> 2\n");

    assert_eq!(next(&mut rx).await.name(), Some("A"));
    assert_eq!(next(&mut rx).await.name(), Some("B"));
    assert!(chat_log.is_alive());

    chat_log.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
pub async fn test_learns_namelen_while_tailing() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");

    let chat_log = ChatLog::new(polling(&logfile));
    let mut rx = subscribe(&chat_log, MessageKind::Pub.into());

    chat_log.start().await.unwrap();
    append(
        &logfile,
        b"  Message Name Length: 8\n      x> y> tricky name\n",
    );

    let message = next(&mut rx).await;
    assert_eq!(message.name(), Some("x> y"));
    assert_eq!(message.text(), Some("tricky name"));
    assert_eq!(chat_log.namelen(), Some(8));

    chat_log.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
pub async fn test_find_reply_after_command() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");

    let config = polling(&logfile).parser(ParserConfig::default().history_window(2));
    let chat_log = ChatLog::new(config);
    let mut rx = subscribe(&chat_log, Interest::Any);

    chat_log.start().await.unwrap();

    append(&logfile, b"  Bob is in arena 0\n");
    assert_eq!(next(&mut rx).await.kind(), MessageKind::Unknown);

    chat_log.record_command(MessageKind::Pub, FIND_COMMAND);
    append(&logfile, b"  Bob is in arena 0\n");

    let message = next(&mut rx).await;
    assert!(matches!(message.data(), MessageData::QueryFind(_)));

    chat_log.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
pub async fn test_watch_wakes_before_idle() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");

    let config = ChatLogConfig::new(&logfile).idle(Duration::from_secs(30));
    let chat_log = ChatLog::new(config);
    let mut rx = subscribe(&chat_log, Interest::Any);

    chat_log.start().await.unwrap();
    time::sleep(Duration::from_millis(100)).await;
    append(&logfile, b"  Quick> reply\n");

    let message = time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Change event did not wake the tail")
        .unwrap();
    assert_eq!(message.name(), Some("Quick"));

    chat_log.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
pub async fn test_dropping_handles_ends_tail() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");

    let chat_log = ChatLog::new(polling(&logfile));
    let mut rx = subscribe(&chat_log, Interest::Any);

    chat_log.start().await.unwrap();
    drop(chat_log);

    // The observer (and its sender) goes away with the last handle.
    let closed = time::timeout(TIMEOUT_2_SEC, rx.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
pub async fn test_stop_aborts_busy_tail_in_time() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("chat.log");

    let chat_log = ChatLog::new(polling(&logfile));
    let (tx, mut rx) = unbounded_channel();
    chat_log.add_observer(Interest::Any, move |_: &ChatLog, _: &Message| -> ObserverResult {
        tx.send(())?;
        std::thread::sleep(Duration::from_secs(2));
        Ok(())
    });

    chat_log.start().await.unwrap();
    append(&logfile, b"  Slow> observer\n");

    time::timeout(TIMEOUT_2_SEC, rx.recv())
        .await
        .expect("Timed out waiting for dispatch")
        .unwrap();

    let wait = Duration::from_millis(50);
    let started = time::Instant::now();
    chat_log.stop(wait).await;

    assert!(
        started.elapsed() < IDLE + wait + Duration::from_millis(500),
        "stop took {:?}",
        started.elapsed()
    );
    assert!(!chat_log.is_alive());
}
