//! Core engine for self-prompt injection into a parent console.
//!
//! An agent process calls back into its own front end by synthesizing key
//! events into the ancestor process's console input buffer, creating an
//! autonomous turn loop. This crate owns the two subsystems that make that
//! safe: the console-injection engine (attach, write, release, always in
//! that order, always serialized) and the guardrail/orchestration state
//! machine that bounds how often and how much the loop may run.
//!
//! Protocol framing lives in `ouro-mcp-server`; this crate is transport
//! agnostic.

pub mod audit;
pub mod config;
pub mod console;
pub mod guardrails;
pub mod injector;
pub mod keyevents;
pub mod orchestrator;
pub mod registry;
pub mod state;

pub use audit::AuditEntry;
pub use audit::AuditMode;
pub use audit::AuditSink;
pub use config::OuroConfig;
pub use console::ConsoleDriver;
pub use console::ConsoleError;
pub use console::ConsoleProbe;
pub use console::FakeConsole;
pub use console::native_driver;
pub use guardrails::GuardrailBreach;
pub use injector::Injector;
pub use orchestrator::Accepted;
pub use orchestrator::CommandRequest;
pub use orchestrator::ConfigureRequest;
pub use orchestrator::InjectionRequest;
pub use orchestrator::Orchestrator;
pub use orchestrator::StatusReport;
pub use orchestrator::SubmitError;
