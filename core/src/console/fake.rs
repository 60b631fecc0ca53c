//! Deterministic in-memory console driver for tests.
//!
//! Mirrors the step structure of the real driver: attach, open, validate,
//! close, detach, with scriptable failure at any step. The journal records
//! every step so tests can assert ordering, serialization, and that failed
//! acquisitions leave no attach state behind.

use std::sync::Arc;
use std::sync::Mutex;

use super::ConsoleApi;
use super::ConsoleDriver;
use super::SteppedDriver;
use crate::keyevents::KeyTransition;

/// Which step of the cycle should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    Attach,
    Open,
    Validate,
    Write,
}

/// One observed step, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
    Attach,
    Open,
    Validate,
    Close,
    Detach,
    /// Rendered key-down characters of one write batch.
    Write(String),
}

#[derive(Debug, Default)]
struct FakeState {
    fail: Option<FakeFailure>,
    attached: bool,
    open_handles: u32,
    max_open_handles: u32,
    next_raw: isize,
    journal: Vec<FakeEvent>,
}

/// Shared handle onto the fake console; clone freely, all clones observe
/// the same state.
#[derive(Clone, Default)]
pub struct FakeConsole {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a driver backed by this fake.
    pub fn driver(&self) -> Arc<dyn ConsoleDriver> {
        Arc::new(SteppedDriver::new(self.clone()))
    }

    /// Make the given step fail until [`FakeConsole::clear_failure`].
    pub fn fail_at(&self, step: FakeFailure) {
        self.lock().fail = Some(step);
    }

    pub fn clear_failure(&self) {
        self.lock().fail = None;
    }

    /// Whether the process is currently attached to the fake console.
    /// Must be `false` after any completed acquire/release or failed acquire.
    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    pub fn open_handles(&self) -> u32 {
        self.lock().open_handles
    }

    /// Highest number of simultaneously open input handles ever observed.
    /// Stays at 1 when sessions are properly serialized.
    pub fn max_open_handles(&self) -> u32 {
        self.lock().max_open_handles
    }

    pub fn journal(&self) -> Vec<FakeEvent> {
        self.lock().journal.clone()
    }

    /// The key-down text of each write batch, in write order.
    pub fn written(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|event| match event {
                FakeEvent::Write(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConsoleApi for FakeConsole {
    fn detach(&self) {
        let mut state = self.lock();
        state.journal.push(FakeEvent::Detach);
        state.attached = false;
    }

    fn attach_parent(&self) -> Result<(), String> {
        let mut state = self.lock();
        state.journal.push(FakeEvent::Attach);
        if state.fail == Some(FakeFailure::Attach) {
            return Err("fake: parent has no console".to_string());
        }
        state.attached = true;
        Ok(())
    }

    fn open_input(&self) -> Result<isize, String> {
        let mut state = self.lock();
        state.journal.push(FakeEvent::Open);
        if state.fail == Some(FakeFailure::Open) {
            return Err("fake: CONIN$ open failed".to_string());
        }
        state.next_raw += 1;
        state.open_handles += 1;
        state.max_open_handles = state.max_open_handles.max(state.open_handles);
        Ok(state.next_raw)
    }

    fn validate(&self, _raw: isize) -> Result<Option<String>, String> {
        let mut state = self.lock();
        state.journal.push(FakeEvent::Validate);
        if state.fail == Some(FakeFailure::Validate) {
            return Err("fake: handle is not a console".to_string());
        }
        Ok(Some("0x01f7".to_string()))
    }

    fn close(&self, _raw: isize) {
        let mut state = self.lock();
        state.journal.push(FakeEvent::Close);
        state.open_handles = state.open_handles.saturating_sub(1);
    }

    fn write(&self, _raw: isize, events: &[KeyTransition]) -> Result<usize, String> {
        let mut state = self.lock();
        if state.fail == Some(FakeFailure::Write) {
            return Err("fake: WriteConsoleInput rejected the batch".to_string());
        }
        let text: String = events.iter().filter(|e| e.down).map(|e| e.ch).collect();
        state.journal.push(FakeEvent::Write(text));
        Ok(events.len())
    }
}
