//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Background loops (certificate renewal, service discovery, CSR approval):
//!     → poll.rs (check predicate, sleep, re-check until done or canceled)
//!     → On failure: backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - Every wait is cancellable through the shared shutdown token
//! - Jittered backoff prevents synchronized retries across replicas
//! - Polling is an explicit state machine so termination is testable

pub mod backoff;
pub mod poll;
