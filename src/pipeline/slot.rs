//! Single-slot frame mailbox shared by the capture thread and the main loop

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;

use crate::capture::Frame;

/// Holds at most the most recent frame. Writers replace it whole under the
/// lock; there is no queue, so an unread frame is dropped when the next one
/// arrives. The lock only covers the swap or the clone-out, never a read
/// from the device.
pub struct SharedFrameSlot {
    slot: Mutex<Slot>,

    /// Set once the producer has stopped for good
    finished: AtomicBool,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    unread: bool,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Snapshot of slot counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotStats {
    pub written: usize,
    pub read: usize,
    pub dropped: usize,
}

impl SharedFrameSlot {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            finished: AtomicBool::new(false),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: replace the current frame.
    pub fn publish(&self, frame: Frame) {
        let overwrote_unread = {
            let mut slot = self.lock();
            let unread = slot.unread;
            slot.frame = Some(frame);
            slot.unread = true;
            unread
        };

        if overwrote_unread {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer: copy of the most recent frame, or `None` before the first
    /// frame arrives.
    pub fn latest(&self) -> Option<Frame> {
        let frame = {
            let mut slot = self.lock();
            slot.unread = false;
            slot.frame.clone()
        };

        if frame.is_some() {
            self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Mark the producer as done. The last frame stays readable.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }

    // A panicking writer cannot leave a half-written frame behind, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SharedFrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn patterned(seq: u64, width: u32, height: u32) -> Frame {
        let fill = (seq % 251) as u8;
        let mut data = vec![fill; (width * height * 3) as usize];
        // Trailer carries a checksum of the body
        let sum = data[..data.len() - 1]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        let last = data.len() - 1;
        data[last] = sum;
        Frame::from_bgr(seq, width, height, data).unwrap()
    }

    fn checksum_ok(frame: &Frame) -> bool {
        let (body, trailer) = frame.data.split_at(frame.data.len() - 1);
        let fill = (frame.sequence() % 251) as u8;
        body.iter().all(|b| *b == fill)
            && body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) == trailer[0]
    }

    #[test]
    fn empty_until_first_publish() {
        let slot = SharedFrameSlot::new();
        assert!(slot.latest().is_none());
        slot.publish(patterned(1, 4, 4));
        assert_eq!(slot.latest().map(|f| f.sequence()), Some(1));
    }

    #[test]
    fn last_writer_wins_and_counts_drops() {
        let slot = SharedFrameSlot::new();
        slot.publish(patterned(1, 4, 4));
        slot.publish(patterned(2, 4, 4));
        slot.publish(patterned(3, 4, 4));

        assert_eq!(slot.latest().map(|f| f.sequence()), Some(3));
        assert_eq!(
            slot.stats(),
            SlotStats {
                written: 3,
                read: 1,
                dropped: 2
            }
        );
    }

    #[test]
    fn concurrent_reads_never_see_torn_frames() {
        let slot = Arc::new(SharedFrameSlot::new());
        let writer_slot = slot.clone();

        let writer = thread::spawn(move || {
            for seq in 0..2_000u64 {
                // Alternate geometry so a torn frame would also break the length
                let (w, h) = if seq % 2 == 0 { (32, 24) } else { (16, 8) };
                writer_slot.publish(patterned(seq, w, h));
            }
            writer_slot.finish();
        });

        let mut observed = 0;
        while !slot.is_finished() || observed == 0 {
            if let Some(frame) = slot.latest() {
                assert_eq!(
                    frame.data.len(),
                    (frame.width() * frame.height() * 3) as usize
                );
                assert!(checksum_ok(&frame), "torn frame {}", frame.sequence());
                observed += 1;
            }
        }

        writer.join().unwrap();
        assert!(observed > 0);
    }

    #[test]
    fn copies_are_independent_of_later_writes() {
        let slot = SharedFrameSlot::new();
        slot.publish(patterned(5, 4, 4));
        let held = slot.latest().unwrap();
        slot.publish(patterned(6, 4, 4));

        assert_eq!(held.sequence(), 5);
        assert!(checksum_ok(&held));
    }
}
