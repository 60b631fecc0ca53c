//! Serialized injection over the process-wide console resource.
//!
//! Attach/detach console association is global to the process: two sessions
//! interleaving those calls can attach to the wrong target or leave the
//! process permanently detached. A single async mutex scopes the whole
//! acquire/write/release cycle, across all background sequences.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::console::ConsoleDriver;
use crate::console::ConsoleError;
use crate::console::ConsoleProbe;
use crate::console::ConsoleSession;
use crate::keyevents;

pub struct Injector {
    driver: Arc<dyn ConsoleDriver>,
    gate: Mutex<()>,
}

impl Injector {
    pub fn new(driver: Arc<dyn ConsoleDriver>) -> Self {
        Self {
            driver,
            gate: Mutex::new(()),
        }
    }

    /// Acquire the parent console, write `text` (plus the Enter terminator
    /// when requested) as one batch, and release. Returns records written.
    pub async fn inject(&self, text: &str, append_enter: bool) -> Result<usize, ConsoleError> {
        let _serialized = self.gate.lock().await;
        let session = ConsoleSession::acquire(self.driver.as_ref())?;
        let events = keyevents::encode(text, append_enter);
        session.write(&events)
    }

    /// Check whether an injection could currently succeed. Takes the same
    /// gate as [`Injector::inject`] so a probe never interleaves with a
    /// mid-flight attach cycle.
    pub async fn probe(&self) -> ConsoleProbe {
        let _serialized = self.gate.lock().await;
        self.driver.probe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::FakeConsole;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_injections_never_overlap_sessions() {
        let fake = FakeConsole::new();
        let injector = Arc::new(Injector::new(fake.driver()));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let injector = Arc::clone(&injector);
            tasks.push(tokio::spawn(async move {
                injector.inject(&format!("turn {i}"), true).await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("inject");
        }

        assert_eq!(fake.max_open_handles(), 1);
        assert_eq!(fake.written().len(), 8);
        assert!(!fake.is_attached());
    }

    #[tokio::test]
    async fn probe_reports_availability_and_mode() {
        let fake = FakeConsole::new();
        let injector = Injector::new(fake.driver());
        let probe = injector.probe().await;
        assert!(probe.available);
        assert_eq!(probe.console_mode.as_deref(), Some("0x01f7"));
        assert_eq!(probe.error, None);
    }
}
