//! Straylight — domain-level process isolation core for AArch64.
//!
//! Tasks are assigned to isolation domains when their image is
//! replaced, and privilege is granted only as single scoped
//! capabilities checked against the domain's policy at the instant of
//! each transition. The boot/run harness around the target machine is
//! an external collaborator; this crate is the enforcement core plus an
//! operator CLI for validating configurations offline.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod kernel;
pub mod logging;
pub mod scenario;
pub mod types;
