//! Stub console capability for platforms without Win32 console attachment.
//!
//! Keeps the crate compiling everywhere; every acquisition reports the
//! console unavailable, which callers already treat as a recoverable state.

use super::ConsoleApi;
use crate::keyevents::KeyTransition;

const UNSUPPORTED: &str = "console input injection is only supported on Windows";

pub(crate) struct UnsupportedApi;

impl ConsoleApi for UnsupportedApi {
    fn detach(&self) {}

    fn attach_parent(&self) -> Result<(), String> {
        Err(UNSUPPORTED.to_string())
    }

    fn open_input(&self) -> Result<isize, String> {
        Err(UNSUPPORTED.to_string())
    }

    fn validate(&self, _raw: isize) -> Result<Option<String>, String> {
        Err(UNSUPPORTED.to_string())
    }

    fn close(&self, _raw: isize) {}

    fn write(&self, _raw: isize, _events: &[KeyTransition]) -> Result<usize, String> {
        Err(UNSUPPORTED.to_string())
    }
}
