//! Per-stream measurement queues between acquisition and correlation.
//!
//! Each queue has its own lock, held only for one push or one drain.
//! Both queues share a [`Notifier`] that is signaled on every push, so
//! the correlation thread can sleep until there is something new.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tdctools::{Meas, Stream};

/// Wakeup signal with a latch, so a notification sent while nobody is
/// waiting is not lost.
#[derive(Default)]
pub struct Notifier {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        *self.pending.lock() = true;
        self.cv.notify_one();
    }

    /// Block until notified or `timeout` elapses, returning whether a
    /// notification arrived. Clears the latch.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            self.cv.wait_for(&mut pending, timeout);
        }
        std::mem::replace(&mut *pending, false)
    }
}

/// FIFO of the measurements of one stream, in arrival order
pub struct ChannelQueue {
    stream: Stream,
    buf: Mutex<VecDeque<Meas>>,
    notifier: Arc<Notifier>,
}

impl ChannelQueue {
    pub fn new(stream: Stream, notifier: Arc<Notifier>) -> Self {
        ChannelQueue { stream, buf: Mutex::new(VecDeque::new()), notifier }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    pub fn push(&self, m: Meas) {
        self.buf.lock().push_back(m);
        self.notifier.notify();
    }

    pub fn pop_front(&self) -> Option<Meas> {
        self.buf.lock().pop_front()
    }

    /// Take everything queued, leaving the queue empty
    pub fn drain_all(&self) -> Vec<Meas> {
        self.buf.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }
}

/// The two stream queues and their shared notifier
pub struct Queues {
    pub a: ChannelQueue,
    pub b: ChannelQueue,
    pub notifier: Arc<Notifier>,
}

impl Queues {
    pub fn new() -> Arc<Self> {
        let notifier = Arc::new(Notifier::new());
        Arc::new(Queues {
            a: ChannelQueue::new(Stream::A, notifier.clone()),
            b: ChannelQueue::new(Stream::B, notifier.clone()),
            notifier,
        })
    }

    pub fn get(&self, stream: Stream) -> &ChannelQueue {
        match stream {
            Stream::A => &self.a,
            Stream::B => &self.b,
        }
    }

    /// Queue a measurement on the stream its stop input belongs to
    pub fn route(&self, m: Meas) {
        self.get(m.stop_channel.stream()).push(m);
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty() && self.b.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::thread;
    use std::time::Instant;
    use tdctools::StopChannel;

    fn meas(ch: StopChannel, ref_index: u32) -> Meas {
        Meas::new(ch, ref_index, 0, 1., 5e6, Utc::now())
    }

    #[test]
    fn fifo_order() {
        let q = ChannelQueue::new(Stream::A, Arc::new(Notifier::new()));
        q.push(meas(StopChannel::Stop0, 3));
        q.push(meas(StopChannel::Stop2, 1));
        q.push(meas(StopChannel::Stop0, 2));
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop_front().map(|m| m.ref_index), Some(3));
        let rest: Vec<u32> = q.drain_all().iter().map(|m| m.ref_index).collect();
        assert_eq!(rest, vec![1, 2]);
        assert!(q.is_empty());
        assert!(q.pop_front().is_none());
        assert!(q.drain_all().is_empty());
    }

    #[test]
    fn routing_by_parity() {
        let queues = Queues::new();
        for ch in StopChannel::ALL.iter() {
            queues.route(meas(*ch, ch.index() as u32));
        }
        let a: Vec<u32> = queues.a.drain_all().iter().map(|m| m.ref_index).collect();
        let b: Vec<u32> = queues.b.drain_all().iter().map(|m| m.ref_index).collect();
        assert_eq!(a, vec![0, 2]);
        assert_eq!(b, vec![1, 3]);
        assert!(queues.is_empty());
    }

    #[test]
    fn push_latches_notification() {
        let queues = Queues::new();
        queues.b.push(meas(StopChannel::Stop1, 0));
        // Sent before anyone waited
        assert!(queues.notifier.wait_for(Duration::from_secs(5)));
        assert!(!queues.notifier.wait_for(Duration::from_millis(1)));
    }

    #[test]
    fn push_wakes_waiter() {
        let queues = Queues::new();
        let q = queues.clone();
        let start = Instant::now();
        let waiter = thread::spawn(move || q.notifier.wait_for(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        queues.a.push(meas(StopChannel::Stop0, 0));
        assert!(waiter.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
