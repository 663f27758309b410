//! Key sources for KEYIN: a channel-backed source for interactive hosts,
//! a reader-backed one for headless runs, and a fixed queue for tests.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::charset;
use crate::constants::Word;
use crate::runtime::{KeyEvent, KeySource};

/// How long a blocked KEYIN waits between checks of the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Receives key codes over an SPSC channel. Codes sent before a tick are
/// observed by any KEYIN on or after that tick, in FIFO order. A raised
/// stop flag or a dropped sender wakes a blocked KEYIN with
/// [`KeyEvent::Closed`].
pub struct ChannelKeySource {
    receiver: mpsc::Receiver<Word>,
    stop: Arc<AtomicBool>,
}

/// Build a connected sender/source pair sharing a stop flag.
pub fn key_channel(stop: Arc<AtomicBool>) -> (mpsc::Sender<Word>, ChannelKeySource) {
    let (sender, receiver) = mpsc::channel();
    (sender, ChannelKeySource { receiver, stop })
}

impl KeySource for ChannelKeySource {
    fn next_key(&mut self) -> KeyEvent {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                debug!("key wait cancelled");
                return KeyEvent::Closed;
            }
            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(code) => return KeyEvent::Code(code),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => return KeyEvent::Closed,
            }
        }
    }
}

/// Reads key codes from a line-oriented reader (stdin in headless mode):
/// the first character of each line, encoded through the character table.
/// Unmappable characters are skipped; end of input surfaces as `Closed`.
pub struct ReaderKeySource<R> {
    reader: R,
}

impl<R: BufRead> ReaderKeySource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> KeySource for ReaderKeySource<R> {
    fn next_key(&mut self) -> KeyEvent {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) | Err(_) => return KeyEvent::Closed,
                Ok(_) => {}
            }
            if let Some(c) = line.trim().chars().next() {
                if let Ok(code) = charset::encode(c) {
                    return KeyEvent::Code(code);
                }
                debug!(?c, "ignoring unmapped input character");
            }
        }
    }
}

/// A fixed sequence of key codes.
#[derive(Default)]
pub struct QueuedKeys {
    codes: VecDeque<Word>,
}

impl QueuedKeys {
    pub fn new(codes: impl IntoIterator<Item = Word>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }
}

impl KeySource for QueuedKeys {
    fn next_key(&mut self) -> KeyEvent {
        match self.codes.pop_front() {
            Some(code) => KeyEvent::Code(code),
            None => KeyEvent::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_source_encodes_first_chars_test() {
        let input = b"h\n \ne\n" as &[u8];
        let mut source = ReaderKeySource::new(input);
        assert!(matches!(source.next_key(), KeyEvent::Code(7)));
        // The blank line is skipped entirely.
        assert!(matches!(source.next_key(), KeyEvent::Code(4)));
        assert!(matches!(source.next_key(), KeyEvent::Closed));
    }

    #[test]
    fn channel_source_honors_stop_test() {
        let stop = Arc::new(AtomicBool::new(false));
        let (sender, mut source) = key_channel(stop.clone());
        sender.send(3).unwrap();
        assert!(matches!(source.next_key(), KeyEvent::Code(3)));

        stop.store(true, Ordering::Relaxed);
        assert!(matches!(source.next_key(), KeyEvent::Closed));
    }

    #[test]
    fn disconnected_sender_closes_test() {
        let stop = Arc::new(AtomicBool::new(false));
        let (sender, mut source) = key_channel(stop);
        drop(sender);
        assert!(matches!(source.next_key(), KeyEvent::Closed));
    }
}
