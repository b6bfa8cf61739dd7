//! One handoff slot per producer thread.
//!
//! State machine: `EMPTY -> FILLING -> READY -> EMPTY`. Only the owning producer moves a
//! slot out of `EMPTY`; only the consumer (or `stop`) moves it out of `READY`. Every
//! transition other than the producer's claim happens under the payload mutex, so a waiter
//! that checks the state while holding that mutex cannot miss a wakeup.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use vxio_core::config::WaitStrategy;

use crate::error::BatchError;
use crate::types::Batch;

pub type SlotPayload = Result<Batch, BatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Empty = 0,
    Filling = 1,
    Ready = 2,
}

impl SlotState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SlotState::Filling,
            2 => SlotState::Ready,
            _ => SlotState::Empty,
        }
    }
}

#[derive(Debug)]
struct Slot {
    state: AtomicU8,
    payload: Mutex<Option<SlotPayload>>,
    changed: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SlotState::Empty as u8),
            payload: Mutex::new(None),
            changed: Condvar::new(),
        }
    }

    fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn lock(&self) -> MutexGuard<'_, Option<SlotPayload>> {
        self.payload.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_locked(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::SeqCst);
        self.changed.notify_all();
    }
}

#[derive(Debug)]
pub struct SlotRing {
    slots: Vec<Slot>,
    wait: WaitStrategy,
}

impl SlotRing {
    pub fn new(num_slots: usize, wait: WaitStrategy) -> Self {
        Self {
            slots: (0..num_slots).map(|_| Slot::new()).collect(),
            wait,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn wait_strategy(&self) -> WaitStrategy {
        self.wait
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.slots[slot].state()
    }

    /// Producer: `EMPTY -> FILLING`. Fails if the slot is not empty.
    pub fn try_claim(&self, slot: usize) -> bool {
        self.slots[slot]
            .state
            .compare_exchange(
                SlotState::Empty as u8,
                SlotState::Filling as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Producer: gives a claim back without publishing (`FILLING -> EMPTY`).
    pub fn abandon_claim(&self, slot: usize) {
        let s = &self.slots[slot];
        let _guard = s.lock();
        s.set_locked(SlotState::Empty);
    }

    /// Producer: stores the payload and marks the slot `READY`.
    pub fn publish(&self, slot: usize, payload: SlotPayload) {
        let s = &self.slots[slot];
        let mut guard = s.lock();
        *guard = Some(payload);
        s.set_locked(SlotState::Ready);
    }

    /// Consumer: takes the payload and marks the slot `EMPTY`. `None` if it was not ready.
    pub fn take(&self, slot: usize) -> Option<SlotPayload> {
        let s = &self.slots[slot];
        let mut guard = s.lock();
        if s.state() != SlotState::Ready {
            return None;
        }
        let payload = guard.take();
        s.set_locked(SlotState::Empty);
        payload
    }

    /// Consumer: shared copy of a ready payload; the slot stays `READY`.
    pub fn peek(&self, slot: usize) -> Option<SlotPayload> {
        let s = &self.slots[slot];
        let guard = s.lock();
        if s.state() != SlotState::Ready {
            return None;
        }
        guard.clone()
    }

    /// Waits out an in-flight fill, then drops any pending payload.
    /// Returns whether a ready payload was discarded. Producers must already be paused.
    pub fn discard(&self, slot: usize) -> bool {
        self.wait_while(slot, |state| state == SlotState::Filling, || true);
        let s = &self.slots[slot];
        let mut guard = s.lock();
        if s.state() != SlotState::Ready {
            return false;
        }
        *guard = None;
        s.set_locked(SlotState::Empty);
        true
    }

    /// Producer: blocks while the slot is `READY`. False if `keep_waiting` gave up first.
    pub fn wait_until_free(&self, slot: usize, keep_waiting: impl Fn() -> bool) -> bool {
        self.wait_while(slot, |state| state == SlotState::Ready, keep_waiting)
    }

    /// Consumer: blocks until the slot is `READY`. False if `keep_waiting` gave up first.
    pub fn wait_until_ready(&self, slot: usize, keep_waiting: impl Fn() -> bool) -> bool {
        self.wait_while(slot, |state| state != SlotState::Ready, keep_waiting)
    }

    fn wait_while(
        &self,
        slot: usize,
        blocked: impl Fn(SlotState) -> bool,
        keep_waiting: impl Fn() -> bool,
    ) -> bool {
        let s = &self.slots[slot];
        match self.wait {
            WaitStrategy::Poll { .. } => loop {
                if !blocked(s.state()) {
                    return true;
                }
                if !keep_waiting() {
                    return false;
                }
                std::thread::sleep(self.wait.interval());
            },
            WaitStrategy::Park { .. } => {
                let timeout: Duration = self.wait.interval();
                let mut guard = s.lock();
                loop {
                    if !blocked(s.state()) {
                        return true;
                    }
                    if !keep_waiting() {
                        return false;
                    }
                    guard = s
                        .changed
                        .wait_timeout(guard, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}
