//! Sliding-window bookkeeping for the sender.
//!
//! Shared by the send loop, the ack listener and the control listener. Each
//! operation runs under one lock so `record_ack` and `can_send` always see a
//! consistent `window_start` / `window_size` pair.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use netviz_types::TransferEvent;
use parking_lot::Mutex;

use crate::telemetry::EventSink;

struct WindowState {
    window_size: u32,
    /// Smallest seq not yet acknowledged.
    window_start: i32,
    /// Next seq never sent.
    next_seq: i32,
    /// Encoded packets awaiting ack, kept for retransmission.
    unacked: BTreeMap<i32, Bytes>,
    /// Last transmission time per unacked seq. Same key set as `unacked`.
    send_times: BTreeMap<i32, Instant>,
}

impl WindowState {
    fn window_end(&self) -> i32 {
        let end = i64::from(self.window_start) + i64::from(self.window_size) - 1;
        end.min(i64::from(i32::MAX)) as i32
    }
}

pub struct WindowManager {
    state: Mutex<WindowState>,
    events: Arc<dyn EventSink>,
}

impl WindowManager {
    /// Window of `window_size` seqs starting at `initial_seq`. A zero size is raised to 1.
    pub fn new(window_size: u32, initial_seq: i32, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(WindowState {
                window_size: window_size.max(1),
                window_start: initial_seq,
                next_seq: initial_seq,
                unacked: BTreeMap::new(),
                send_times: BTreeMap::new(),
            }),
            events,
        }
    }

    /// True iff `seq <= window_start + window_size - 1` under the current size.
    pub fn can_send(&self, seq: i32) -> bool {
        seq <= self.state.lock().window_end()
    }

    /// Store an encoded packet as it goes on the wire and start its timer.
    pub fn record_sent(&self, seq: i32, packet: Bytes) {
        let mut state = self.state.lock();
        state.unacked.insert(seq, packet);
        state.send_times.insert(seq, Instant::now());
        if seq >= state.next_seq {
            state.next_seq = seq.saturating_add(1);
        }
    }

    /// Apply a cumulative ack: everything at or below `ack_seq` is delivered.
    ///
    /// The window then slides over every slot that is no longer unacked, up
    /// to `next_seq`. Returns true if `window_start` moved.
    pub fn record_ack(&self, ack_seq: i32) -> bool {
        let mut state = self.state.lock();

        let acked = match ack_seq.checked_add(1) {
            Some(above) => {
                let pending = state.unacked.split_off(&above);
                std::mem::replace(&mut state.unacked, pending)
            }
            None => std::mem::take(&mut state.unacked),
        };
        for seq in acked.keys() {
            state.send_times.remove(seq);
        }

        let old_start = state.window_start;
        while state.window_start < state.next_seq && !state.unacked.contains_key(&state.window_start) {
            state.window_start += 1;
        }

        if state.window_start == old_start {
            return false;
        }
        let event = TransferEvent::WindowMoved {
            old_start,
            new_start: state.window_start,
            new_end: state.window_end(),
        };
        drop(state);
        self.events.emit(event);
        true
    }

    /// Snapshot of in-flight seqs in ascending order.
    pub fn unacked_seqs(&self) -> Vec<i32> {
        self.state.lock().unacked.keys().copied().collect()
    }

    /// Stored packet bytes for `seq`, or `None` once it has been acked.
    pub fn get_packet(&self, seq: i32) -> Option<Bytes> {
        self.state.lock().unacked.get(&seq).cloned()
    }

    pub fn get_last_send_time(&self, seq: i32) -> Option<Instant> {
        self.state.lock().send_times.get(&seq).copied()
    }

    /// Restart the timer of `seq` after a retransmission. No-op if it was acked meanwhile.
    pub fn update_send_timestamp(&self, seq: i32) {
        let mut state = self.state.lock();
        if state.unacked.contains_key(&seq) {
            state.send_times.insert(seq, Instant::now());
        }
    }

    /// Change the admission horizon. Packets already in flight are unaffected.
    pub fn set_window_size(&self, window_size: u32) {
        if window_size == 0 {
            tracing::warn!("window size 0 would stall the transfer, using 1");
        }
        self.state.lock().window_size = window_size.max(1);
    }

    pub fn window_size(&self) -> u32 {
        self.state.lock().window_size
    }

    pub fn window_start(&self) -> i32 {
        self.state.lock().window_start
    }

    pub fn window_end(&self) -> i32 {
        self.state.lock().window_end()
    }

    pub fn next_seq(&self) -> i32 {
        self.state.lock().next_seq
    }

    pub fn unacked_len(&self) -> usize {
        self.state.lock().unacked.len()
    }

    /// Nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.state.lock().unacked.is_empty()
    }

    /// `(window_start, window_end)` read under a single lock.
    pub fn bounds(&self) -> (i32, i32) {
        let state = self.state.lock();
        (state.window_start, state.window_end())
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        let state = self.state.lock();
        assert!(state.window_start <= state.next_seq);
        assert!(state.unacked.keys().eq(state.send_times.keys()));
        for &seq in state.unacked.keys() {
            assert!(seq >= state.window_start && seq < state.next_seq, "seq {} outside window", seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{ChannelSink, NullSink};

    fn manager(size: u32) -> WindowManager {
        WindowManager::new(size, 0, Arc::new(NullSink))
    }

    fn send_range(wm: &WindowManager, seqs: std::ops::Range<i32>) {
        for seq in seqs {
            wm.record_sent(seq, Bytes::from(vec![seq as u8]));
        }
    }

    #[test]
    fn admission_follows_window() {
        let wm = manager(4);
        assert!(wm.can_send(0));
        assert!(wm.can_send(3));
        assert!(!wm.can_send(4));
        assert_eq!(wm.window_end(), 3);
    }

    #[test]
    fn record_sent_advances_next_seq() {
        let wm = manager(4);
        send_range(&wm, 0..3);
        assert_eq!(wm.next_seq(), 3);
        // Re-recording an older seq must not move next_seq backwards
        wm.record_sent(1, Bytes::from_static(b"x"));
        assert_eq!(wm.next_seq(), 3);
        assert_eq!(wm.unacked_seqs(), vec![0, 1, 2]);
        wm.assert_invariants();
    }

    #[test]
    fn in_order_acks_slide_window() {
        let wm = manager(2);
        send_range(&wm, 0..2);
        assert!(!wm.can_send(2));
        assert!(wm.record_ack(0));
        assert_eq!(wm.window_start(), 1);
        assert!(wm.can_send(2));
        assert!(wm.record_ack(1));
        assert_eq!(wm.window_start(), 2);
        assert!(wm.is_idle());
        wm.assert_invariants();
    }

    #[test]
    fn cumulative_ack_clears_lower_seqs() {
        let wm = manager(8);
        send_range(&wm, 0..5);
        // Acks for 0..2 were lost; 3 covers them
        assert!(wm.record_ack(3));
        assert_eq!(wm.unacked_seqs(), vec![4]);
        assert_eq!(wm.window_start(), 4);
        assert!(wm.get_packet(1).is_none());
        assert!(wm.get_last_send_time(2).is_none());
        wm.assert_invariants();
    }

    #[test]
    fn duplicate_ack_is_noop() {
        let wm = manager(4);
        send_range(&wm, 0..3);
        assert!(wm.record_ack(1));
        assert!(!wm.record_ack(1));
        assert!(!wm.record_ack(0));
        assert_eq!(wm.window_start(), 2);
        assert_eq!(wm.unacked_seqs(), vec![2]);
        wm.assert_invariants();
    }

    #[test]
    fn ack_beyond_next_seq_stops_at_sent_prefix() {
        let wm = manager(4);
        send_range(&wm, 0..2);
        assert!(wm.record_ack(10));
        assert_eq!(wm.window_start(), 2);
        assert_eq!(wm.next_seq(), 2);
        assert!(wm.is_idle());
        wm.assert_invariants();
    }

    #[test]
    fn ack_of_max_seq_does_not_overflow() {
        let wm = manager(4);
        send_range(&wm, 0..2);
        wm.record_ack(i32::MAX);
        assert!(wm.is_idle());
    }

    #[test]
    fn window_start_never_decreases() {
        let wm = manager(16);
        send_range(&wm, 0..12);
        let mut last = wm.window_start();
        for ack in [2, 0, 5, 3, 3, 11, 7, -1, 11] {
            wm.record_ack(ack);
            let start = wm.window_start();
            assert!(start >= last);
            last = start;
            wm.assert_invariants();
        }
        assert_eq!(last, 12);
    }

    #[test]
    fn resize_changes_admission_only() {
        let wm = manager(1);
        send_range(&wm, 0..1);
        assert!(!wm.can_send(1));
        wm.set_window_size(5);
        assert!(wm.can_send(4));
        assert!(!wm.can_send(5));
        send_range(&wm, 1..5);
        // Shrinking keeps everything in flight
        wm.set_window_size(2);
        assert_eq!(wm.unacked_len(), 5);
        assert!(!wm.can_send(2));
        wm.assert_invariants();
    }

    #[test]
    fn zero_window_is_clamped() {
        let wm = manager(0);
        assert_eq!(wm.window_size(), 1);
        wm.set_window_size(0);
        assert!(wm.can_send(0));
        assert!(!wm.can_send(1));
    }

    #[test]
    fn timestamp_refresh_skips_acked() {
        let wm = manager(4);
        send_range(&wm, 0..2);
        let first = wm.get_last_send_time(1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        wm.update_send_timestamp(1);
        assert!(wm.get_last_send_time(1).unwrap() > first);

        wm.record_ack(1);
        wm.update_send_timestamp(1);
        assert!(wm.get_last_send_time(1).is_none());
        wm.assert_invariants();
    }

    #[test]
    fn window_moved_emitted_only_on_advance() {
        let (sink, rx) = ChannelSink::bounded(16);
        let wm = WindowManager::new(3, 0, Arc::new(sink));
        send_range(&wm, 0..3);
        wm.record_ack(0);
        wm.record_ack(0);
        wm.record_ack(2);
        let events: Vec<_> = rx.try_iter().map(|r| r.event).collect();
        assert_eq!(
            events,
            vec![
                TransferEvent::WindowMoved { old_start: 0, new_start: 1, new_end: 3 },
                TransferEvent::WindowMoved { old_start: 1, new_start: 3, new_end: 5 },
            ]
        );
    }

    #[test]
    fn concurrent_sends_and_acks_keep_invariants() {
        let wm = Arc::new(manager(8));
        let total = 2_000;

        let sender = {
            let wm = wm.clone();
            std::thread::spawn(move || {
                let mut seq = 0;
                while seq < total {
                    if wm.can_send(seq) {
                        wm.record_sent(seq, Bytes::new());
                        seq += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };
        let acker = {
            let wm = wm.clone();
            std::thread::spawn(move || {
                while wm.window_start() < total {
                    if let Some(&highest) = wm.unacked_seqs().last() {
                        wm.record_ack(highest);
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };

        sender.join().unwrap();
        acker.join().unwrap();
        assert!(wm.is_idle());
        assert_eq!(wm.window_start(), total);
        wm.assert_invariants();
    }
}
