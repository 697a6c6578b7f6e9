#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **supervisor** – supervision trees over function children and nested
//! supervisors: one-for-one / one-for-all restart strategies, a bounded
//! restart-frequency window, and cooperative termination.
//!
//! A supervisor never force-kills a child; it fires a termination signal
//! and trusts the child to wind down, mirroring the emitter/mailbox
//! contract `cells` uses for agents.

mod child;
mod strategy;
mod supervisor;
mod window;

pub use child::{ChildFactory, ChildFuture, ChildHandle};
pub use strategy::Strategy;
pub use supervisor::Supervisor;
