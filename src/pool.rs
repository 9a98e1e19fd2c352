//! Circular datagram pool
//!
//! A fixed ring of pre-allocated framing buffers with two cursors: the
//! producer (the codec, in the block-source context) frames into the slot at
//! `next_empty`; the sender drains from `next_tx`. Slots are visited
//! strictly in cursor order and are never freed — the `in_use` flag moves
//! `false → true` at framing and back at release.
//!
//! When the producer catches up with an un-sent slot it overwrites it
//! (drop-oldest-by-position) and counts the overflow; one observation is
//! emitted when an overflow run starts and one, carrying the number of
//! datagrams lost, when it ends. The producer therefore never blocks and
//! backpressure is visible only through the overflow accounting.
//!
//! The `in_use` flag transfers slot ownership between the two sides with
//! release/acquire ordering; the slot bytes additionally sit behind a
//! mutex that is only ever held for a bounded copy, which keeps the
//! overwrite path sound without changing the observable semantics.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::events::{Event, EventLog};
use crate::metrics::Metrics;

struct Slot {
    in_use: AtomicBool,
    buf: Mutex<Box<[u8]>>,
}

/// The shared ring; access goes through the producer/consumer handles
pub struct DatagramPool {
    slots: Box<[Slot]>,
    datagram_size: usize,
    in_use_count: AtomicUsize,
}

impl DatagramPool {
    /// Allocate every slot up front and hand back the two endpoint handles
    pub fn new(
        num_slots: usize,
        datagram_size: usize,
        events: Arc<EventLog>,
        metrics: Arc<Metrics>,
    ) -> (PoolProducer, PoolConsumer) {
        assert!(num_slots >= 2);
        let slots = (0..num_slots)
            .map(|_| Slot {
                in_use: AtomicBool::new(false),
                buf: Mutex::new(vec![0u8; datagram_size].into_boxed_slice()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let pool = Arc::new(DatagramPool {
            slots,
            datagram_size,
            in_use_count: AtomicUsize::new(0),
        });
        events.log(Event::NumDatagramsFree, num_slots as i64);

        (
            PoolProducer {
                pool: pool.clone(),
                next_empty: 0,
                overflow_streak: 0,
                events: events.clone(),
                metrics: metrics.clone(),
            },
            PoolConsumer {
                pool,
                next_tx: 0,
                events,
                metrics,
            },
        )
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn datagram_size(&self) -> usize {
        self.datagram_size
    }

    /// Number of framed datagrams waiting ahead of the consumer cursor
    pub fn available_to_send(&self) -> usize {
        self.in_use_count.load(Ordering::Acquire)
    }

    /// Number of slots not currently holding an unsent datagram
    pub fn free_slots(&self) -> usize {
        self.num_slots() - self.available_to_send()
    }
}

/// Write endpoint, owned by the audio engine
pub struct PoolProducer {
    pool: Arc<DatagramPool>,
    next_empty: usize,
    overflow_streak: u64,
    events: Arc<EventLog>,
    metrics: Arc<Metrics>,
}

/// A claimed slot, writable until released. The consumer can take the
/// datagram once the slot's lock is gone; [`FramedSlot::publish`] makes
/// that hand-off explicit at the call site.
pub struct FramedSlot<'a> {
    guard: MutexGuard<'a, Box<[u8]>>,
    /// True when this claim displaced an unsent datagram
    pub overflowed: bool,
}

impl FramedSlot<'_> {
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.guard
    }

    pub fn publish(self) {}
}

impl PoolProducer {
    /// Claim the slot at the producer cursor, overwriting an unsent
    /// datagram if one is still there, and advance the cursor.
    pub fn alloc(&mut self) -> FramedSlot<'_> {
        let index = self.next_empty;
        let slot = &self.pool.slots[index];

        let was_in_use = slot.in_use.load(Ordering::Acquire);
        if was_in_use {
            if self.overflow_streak == 0 {
                self.events.log(Event::DatagramOverflowBegins, index as i64);
                tracing::warn!("datagram pool overflow begins at slot {}", index);
            }
            self.overflow_streak += 1;
            self.metrics.overflows.fetch_add(1, Ordering::Relaxed);
        } else {
            if self.overflow_streak > 0 {
                self.events
                    .log(Event::DatagramNumOverflows, self.overflow_streak as i64);
                tracing::warn!(
                    "datagram pool overflow ended, {} datagrams lost",
                    self.overflow_streak
                );
                self.overflow_streak = 0;
            }
            self.pool.in_use_count.fetch_add(1, Ordering::AcqRel);
        }
        slot.in_use.store(true, Ordering::Release);

        self.events.log(Event::DatagramAlloc, index as i64);
        self.metrics.record_free_slots(self.pool.free_slots());
        self.next_empty = (index + 1) % self.pool.num_slots();

        // Uncontended except when the consumer is copying this very slot
        // out, which is a bounded memcpy.
        let guard = slot.buf.lock().unwrap_or_else(|e| e.into_inner());
        FramedSlot {
            guard,
            overflowed: was_in_use,
        }
    }

    /// Overflows in the run currently in progress (0 outside a run)
    pub fn overflow_streak(&self) -> u64 {
        self.overflow_streak
    }

    pub fn pool(&self) -> &Arc<DatagramPool> {
        &self.pool
    }
}

/// Drain endpoint, owned by the sender thread
pub struct PoolConsumer {
    pool: Arc<DatagramPool>,
    next_tx: usize,
    events: Arc<EventLog>,
    metrics: Arc<Metrics>,
}

impl PoolConsumer {
    /// Whether a framed datagram is waiting at the consumer cursor
    pub fn pending(&self) -> bool {
        self.pool.slots[self.next_tx].in_use.load(Ordering::Acquire)
    }

    /// Copy the datagram at the cursor into `buf` without releasing the
    /// slot; returns false when nothing is pending. `buf` is resized to the
    /// datagram size.
    pub fn copy_pending(&self, buf: &mut Vec<u8>) -> bool {
        let slot = &self.pool.slots[self.next_tx];
        if !slot.in_use.load(Ordering::Acquire) {
            return false;
        }
        let guard = slot.buf.lock().unwrap_or_else(|e| e.into_inner());
        buf.clear();
        buf.extend_from_slice(&guard);
        true
    }

    /// Release the slot at the cursor after a completed send and advance
    pub fn release(&mut self) {
        let index = self.next_tx;
        let slot = &self.pool.slots[index];
        debug_assert!(slot.in_use.load(Ordering::Acquire));

        slot.in_use.store(false, Ordering::Release);
        self.pool.in_use_count.fetch_sub(1, Ordering::AcqRel);
        self.events.log(Event::DatagramFree, index as i64);
        self.events
            .log(Event::NumDatagramsFree, self.pool.free_slots() as i64);
        self.metrics.record_free_slots(self.pool.free_slots());
        self.next_tx = (index + 1) % self.pool.num_slots();
    }

    pub fn available_to_send(&self) -> usize {
        self.pool.available_to_send()
    }

    pub fn pool(&self) -> &Arc<DatagramPool> {
        &self.pool
    }
}
