#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ebus** – the environment: agent registry, subscription graph, tickers
//! and the optional configuration source that picks a router backend.
//!
//! `cells` knows how to run one agent; this crate knows how to wire many of
//! them together, route events along a subscription graph, and front
//! poolable behaviours with several inner runtimes.

mod config;
mod environment;
mod ticker;

pub use cells::{
    AgentExit, AgentHandle, Behaviour, Context, CoreError, CoreResult, Emitter, Event, Failure,
    Identifier, Payload, PoolConfig,
};
pub use config::{Backend, ConfigSource, LayeredConfigSource, MapConfigSource, resolve_backend};
pub use environment::{Environment, Factory};
pub use ticker::TickerEvent;
