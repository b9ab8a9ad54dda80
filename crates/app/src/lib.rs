//! # busscripts-app
//!
//! Application layer: the automation core and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters implement:
//!   - `BusPublisher`: outbound bus messages
//!   - `MessageHandler`: inbound bus messages (implemented by [`runtime::Runtime`])
//!   - `ScriptCompiler` / `CompiledUnit`: turn source into runnable units
//! - Hold the latest state of every topic (`StateStore`)
//! - Match state changes against subscriptions (`Router`)
//! - Fire clock and solar triggers (`Scheduler`, `SunScheduler`)
//! - Load units and contain their faults (`IsolationHost`, `FailureDomain`)
//! - Expose the capability surface units program against (`Capabilities`)
//!
//! ## Dependency rule
//! Depends on `busscripts-domain` only (plus `tokio` for timers and tasks).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod capabilities;
pub mod error;
pub mod host;
pub mod ports;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod scheduler;
pub mod state_store;
pub mod sun_scheduler;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;
