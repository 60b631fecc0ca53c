//! Console attachment and synthetic input drivers.
//!
//! The console input buffer of the parent process is a process-global OS
//! resource: attaching, writing, and detaching must happen as one serialized
//! cycle, and the attachment must be torn down on every exit path. The
//! low-level steps live behind [`ConsoleApi`] so the acquisition/unwind
//! sequence is written once and shared between the Windows implementation
//! and the in-memory fake used in tests.

mod fake;
#[cfg(not(windows))]
mod unsupported;
#[cfg(windows)]
mod windows;

use serde::Serialize;
use thiserror::Error;

use crate::keyevents::KeyTransition;

pub use fake::FakeConsole;
pub use fake::FakeEvent;
pub use fake::FakeFailure;

/// Why the parent console could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// The parent process has no console, or we could not attach to it.
    NoParentConsole,
    /// Attached, but opening the console input buffer failed.
    InputOpenFailed,
    /// The opened handle does not behave like an interactive console.
    NotAConsole,
}

impl UnavailableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnavailableReason::NoParentConsole => "no_parent_console",
            UnavailableReason::InputOpenFailed => "input_open_failed",
            UnavailableReason::NotAConsole => "not_a_console",
        }
    }
}

/// Console-layer failures. Always recoverable: the next request reattaches
/// from scratch, so nothing here is fatal to the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("console unavailable ({}): {detail}", .reason.as_str())]
    Unavailable {
        reason: UnavailableReason,
        detail: String,
    },
    #[error("console input write failed: {detail}")]
    WriteFailed { detail: String },
}

impl ConsoleError {
    pub(crate) fn unavailable(reason: UnavailableReason, detail: impl Into<String>) -> Self {
        ConsoleError::Unavailable {
            reason,
            detail: detail.into(),
        }
    }
}

/// An acquired console input handle. Ephemeral by design: never cached
/// across injections, because the parent console may have gone away.
#[derive(Debug)]
pub struct ConsoleHandle {
    pub(crate) raw: isize,
    pub(crate) mode: Option<String>,
}

/// Result of probing whether an injection could currently succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleProbe {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Low-level console capability. One implementation per platform plus the
/// test fake; everything above depends only on [`ConsoleDriver`].
pub(crate) trait ConsoleApi: Send + Sync {
    /// Dissociate from any current console. Idempotent, best-effort.
    fn detach(&self);
    /// Associate with the immediate parent's console.
    fn attach_parent(&self) -> Result<(), String>;
    /// Open the attached console's input buffer (not process stdin, which
    /// stays piped to the transport even after attaching).
    fn open_input(&self) -> Result<isize, String>;
    /// Confirm the handle is a genuine console; returns the mode string.
    fn validate(&self, raw: isize) -> Result<Option<String>, String>;
    /// Close an input handle. Idempotent, best-effort.
    fn close(&self, raw: isize);
    /// Write the whole batch in one call; returns records written.
    fn write(&self, raw: isize, events: &[KeyTransition]) -> Result<usize, String>;
}

/// Acquire/write/release cycle over a console, with every acquisition
/// failure unwinding the steps already taken.
pub trait ConsoleDriver: Send + Sync {
    fn acquire(&self) -> Result<ConsoleHandle, ConsoleError>;
    fn write(&self, handle: &ConsoleHandle, events: &[KeyTransition]) -> Result<usize, ConsoleError>;
    fn release(&self, handle: ConsoleHandle);

    /// Full acquire/release cycle without writing anything.
    fn probe(&self) -> ConsoleProbe {
        match self.acquire() {
            Ok(handle) => {
                let console_mode = handle.mode.clone();
                self.release(handle);
                ConsoleProbe {
                    available: true,
                    console_mode,
                    error: None,
                }
            }
            Err(err) => ConsoleProbe {
                available: false,
                console_mode: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// [`ConsoleDriver`] implemented in terms of a [`ConsoleApi`].
pub(crate) struct SteppedDriver<A: ConsoleApi> {
    api: A,
}

impl<A: ConsoleApi> SteppedDriver<A> {
    pub(crate) fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: ConsoleApi> ConsoleDriver for SteppedDriver<A> {
    fn acquire(&self) -> Result<ConsoleHandle, ConsoleError> {
        // Step 1: drop any console we already hold. Absence is not an error.
        self.api.detach();

        // Step 2: attach to the parent's console.
        self.api
            .attach_parent()
            .map_err(|detail| ConsoleError::unavailable(UnavailableReason::NoParentConsole, detail))?;

        // Step 3: open the input buffer; undo the attach on failure.
        let raw = match self.api.open_input() {
            Ok(raw) => raw,
            Err(detail) => {
                self.api.detach();
                return Err(ConsoleError::unavailable(
                    UnavailableReason::InputOpenFailed,
                    detail,
                ));
            }
        };

        // Step 4: reject handles that merely opened without being a console.
        match self.api.validate(raw) {
            Ok(mode) => Ok(ConsoleHandle { raw, mode }),
            Err(detail) => {
                self.api.close(raw);
                self.api.detach();
                Err(ConsoleError::unavailable(
                    UnavailableReason::NotAConsole,
                    detail,
                ))
            }
        }
    }

    fn write(&self, handle: &ConsoleHandle, events: &[KeyTransition]) -> Result<usize, ConsoleError> {
        if events.is_empty() {
            return Ok(0);
        }
        self.api
            .write(handle.raw, events)
            .map_err(|detail| ConsoleError::WriteFailed { detail })
    }

    fn release(&self, handle: ConsoleHandle) {
        self.api.close(handle.raw);
        self.api.detach();
    }
}

/// RAII wrapper guaranteeing release on every exit path, including panics
/// and early returns between acquire and write.
pub struct ConsoleSession<'a> {
    driver: &'a dyn ConsoleDriver,
    handle: Option<ConsoleHandle>,
}

impl std::fmt::Debug for ConsoleSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSession")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<'a> ConsoleSession<'a> {
    pub fn acquire(driver: &'a dyn ConsoleDriver) -> Result<Self, ConsoleError> {
        let handle = driver.acquire()?;
        Ok(Self {
            driver,
            handle: Some(handle),
        })
    }

    /// Write one ordered batch through the held handle.
    pub fn write(&self, events: &[KeyTransition]) -> Result<usize, ConsoleError> {
        match self.handle.as_ref() {
            Some(handle) => self.driver.write(handle, events),
            // Handle is only None after Drop has started.
            None => Ok(0),
        }
    }
}

impl Drop for ConsoleSession<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.driver.release(handle);
        }
    }
}

/// The platform console driver: real Win32 attachment on Windows, a driver
/// that reports the console unavailable everywhere else.
pub fn native_driver() -> std::sync::Arc<dyn ConsoleDriver> {
    #[cfg(windows)]
    {
        std::sync::Arc::new(SteppedDriver::new(windows::WinConsoleApi))
    }
    #[cfg(not(windows))]
    {
        std::sync::Arc::new(SteppedDriver::new(unsupported::UnsupportedApi))
    }
}
