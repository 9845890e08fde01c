// codesync-client: room sessions, bootstrap, presence and the ghost agent.

pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod identity;
pub mod propagation;
pub mod services;
pub mod session;
pub mod transport;

pub use session::{RoomSession, SessionOptions};
