//! # busscripts-domain
//!
//! Pure domain model for the busscripts automation daemon.
//!
//! ## Responsibilities
//! - Foundational types: unit identifiers, error taxonomy, timestamps
//! - Define the **topic codec** (`status`/`set` namespaces, aliases)
//! - Define **state records** and the payload decoding rules
//! - Define **topic patterns** (wildcards and regular expressions)
//! - Define **triggers** (cron, absolute instants, recurrence rules)
//! - Compute **solar events** for a date and location
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod pattern;
pub mod solar;
pub mod state;
pub mod topic;
pub mod trigger;
