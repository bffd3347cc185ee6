//! Fixed-capacity blocking FIFO shared between pipeline stages.
//!
//! `put` blocks while the channel is full and `get` blocks while it is empty,
//! which is the pipeline's only flow control. After `close`, getters drain
//! whatever is still queued and then see [`GetError::Closed`]; putters fail
//! immediately and get their item back.

use std::{
    fmt,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, TrySendError, select};
use thiserror::Error;

/// Failed `put`; the rejected item is handed back.
pub enum PutError<T> {
    Closed(T),
    Timeout(T),
    Full(T),
}

impl<T> PutError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PutError::Closed(item) | PutError::Timeout(item) | PutError::Full(item) => item,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PutError::Closed(_))
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Closed(_) => f.write_str("Closed(..)"),
            PutError::Timeout(_) => f.write_str("Timeout(..)"),
            PutError::Full(_) => f.write_str("Full(..)"),
        }
    }
}

impl<T> fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Closed(_) => f.write_str("put on a closed channel"),
            PutError::Timeout(_) => f.write_str("timed out waiting for a free slot"),
            PutError::Full(_) => f.write_str("channel is full"),
        }
    }
}

impl<T> std::error::Error for PutError<T> {}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum GetError {
    #[error("channel closed and drained")]
    Closed,
    #[error("timed out waiting for an item")]
    Timeout,
    #[error("channel is empty")]
    Empty,
}

/// A `crossbeam_channel::bounded` queue with an explicit close.
///
/// Both ends stay owned by the channel, so the queue itself never
/// disconnects; closing drops the sender of a zero-capacity signal channel,
/// which wakes every caller blocked in a select on it.
pub struct BoundedChannel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    closed: AtomicBool,
    capacity: usize,
}

impl<T> BoundedChannel<T> {
    /// A channel holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let (close_tx, close_rx) = crossbeam_channel::bounded::<()>(0);
        Self {
            tx,
            rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Block until a slot is free, then append `item`.
    pub fn put(&self, item: T) -> Result<(), PutError<T>> {
        self.put_until(item, None)
    }

    /// Like [`put`](Self::put) but gives up after `timeout`.
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), PutError<T>> {
        self.put_until(item, Some(Instant::now() + timeout))
    }

    /// Append without waiting.
    pub fn try_put(&self, item: T) -> Result<(), PutError<T>> {
        if self.is_closed() {
            return Err(PutError::Closed(item));
        }
        self.tx.try_send(item).map_err(|err| match err {
            TrySendError::Full(item) => PutError::Full(item),
            TrySendError::Disconnected(item) => PutError::Closed(item),
        })
    }

    fn put_until(&self, item: T, deadline: Option<Instant>) -> Result<(), PutError<T>> {
        if self.is_closed() {
            return Err(PutError::Closed(item));
        }
        let mut sel = Select::new();
        let send = sel.send(&self.tx);
        let closed = sel.recv(&self.close_rx);
        let oper = match deadline {
            None => sel.select(),
            Some(deadline) => match sel.select_deadline(deadline) {
                Ok(oper) => oper,
                Err(_) => return Err(PutError::Timeout(item)),
            },
        };
        match oper.index() {
            index if index == send => oper
                .send(&self.tx, item)
                .map_err(|err| PutError::Closed(err.into_inner())),
            index => {
                debug_assert_eq!(index, closed);
                let _ = oper.recv(&self.close_rx);
                Err(PutError::Closed(item))
            }
        }
    }

    /// Block until an item is available and remove the head.
    pub fn get(&self) -> Result<T, GetError> {
        self.get_until(None)
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<T, GetError> {
        self.get_until(Some(Instant::now() + timeout))
    }

    pub fn try_get(&self) -> Result<T, GetError> {
        match self.rx.try_recv() {
            Ok(item) => Ok(item),
            Err(TryRecvError::Empty) if !self.is_closed() => Err(GetError::Empty),
            Err(_) => Err(GetError::Closed),
        }
    }

    fn get_until(&self, deadline: Option<Instant>) -> Result<T, GetError> {
        if let Ok(item) = self.rx.try_recv() {
            return Ok(item);
        }
        if self.is_closed() {
            return Err(GetError::Closed);
        }
        let received = match deadline {
            None => select! {
                recv(self.rx) -> item => item.ok(),
                recv(self.close_rx) -> _ => None,
            },
            Some(deadline) => select! {
                recv(self.rx) -> item => item.ok(),
                recv(self.close_rx) -> _ => None,
                default(deadline.saturating_duration_since(Instant::now())) => {
                    return Err(GetError::Timeout);
                }
            },
        };
        // Items queued before the close are still delivered.
        received
            .or_else(|| self.rx.try_recv().ok())
            .ok_or(GetError::Closed)
    }

    /// Refuse further puts and wake every blocked caller.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Discard everything queued, returning how many items were dropped.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedChannel")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
    };

    use super::*;

    #[test]
    fn gets_return_puts_in_order() {
        let channel = BoundedChannel::new(16);
        for i in 0..16 {
            channel.put(i).unwrap();
        }
        let drained: Vec<i32> = (0..16).map(|_| channel.get().unwrap()).collect();
        assert_eq!(drained, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn put_on_full_channel_waits_for_a_get() {
        let channel = Arc::new(BoundedChannel::new(1));
        let second_done = Arc::new(AtomicBool::new(false));

        let producer = {
            let channel = channel.clone();
            let second_done = second_done.clone();
            thread::spawn(move || {
                channel.put("first").unwrap();
                channel.put("second").unwrap();
                second_done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!second_done.load(Ordering::SeqCst));
        assert_eq!(channel.len(), 1);

        assert_eq!(channel.get().unwrap(), "first");
        producer.join().unwrap();
        assert!(second_done.load(Ordering::SeqCst));
        assert_eq!(channel.get().unwrap(), "second");
    }

    #[test]
    fn never_exceeds_capacity() {
        let channel = BoundedChannel::new(3);
        for i in 0..3 {
            channel.try_put(i).unwrap();
        }
        assert!(matches!(channel.try_put(3), Err(PutError::Full(3))));
        assert!(matches!(
            channel.put_timeout(4, Duration::from_millis(20)),
            Err(PutError::Timeout(4))
        ));
        assert_eq!(channel.len(), 3);
    }

    #[test]
    fn concurrent_traffic_is_delivered_exactly_once() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;
        let channel = Arc::new(BoundedChannel::new(4));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let channel = channel.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        channel.put(p * PER_PRODUCER + i).unwrap();
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(item) = channel.get() {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        channel.close();

        let mut all: Vec<usize> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
    }

    #[test]
    fn close_drains_then_ends_stream() {
        let channel = BoundedChannel::new(4);
        channel.put(1).unwrap();
        channel.put(2).unwrap();
        channel.close();

        let err = channel.put(3).unwrap_err();
        assert!(err.is_closed());
        assert_eq!(err.into_inner(), 3);

        assert_eq!(channel.get(), Ok(1));
        assert_eq!(channel.get(), Ok(2));
        assert_eq!(channel.get(), Err(GetError::Closed));
        assert_eq!(channel.try_get(), Err(GetError::Closed));
    }

    #[test]
    fn close_wakes_blocked_getters_and_putters() {
        let empty: Arc<BoundedChannel<u8>> = Arc::new(BoundedChannel::new(1));
        let full = Arc::new(BoundedChannel::new(1));
        full.put(0u8).unwrap();

        let getter = {
            let empty = empty.clone();
            thread::spawn(move || empty.get())
        };
        let putter = {
            let full = full.clone();
            thread::spawn(move || full.put(1).map_err(|err| err.is_closed()))
        };

        thread::sleep(Duration::from_millis(50));
        empty.close();
        full.close();
        assert_eq!(getter.join().unwrap(), Err(GetError::Closed));
        assert_eq!(putter.join().unwrap(), Err(true));
    }

    #[test]
    fn get_timeout_on_empty_channel() {
        let channel: BoundedChannel<u8> = BoundedChannel::new(2);
        assert_eq!(
            channel.get_timeout(Duration::from_millis(10)),
            Err(GetError::Timeout)
        );
        assert_eq!(channel.try_get(), Err(GetError::Empty));
    }

    #[test]
    fn clear_frees_slots() {
        let channel = BoundedChannel::new(2);
        channel.put('a').unwrap();
        channel.put('b').unwrap();
        assert_eq!(channel.clear(), 2);
        assert!(channel.is_empty());
        channel.try_put('c').unwrap();
    }
}
