// Local room state: the shared replica and the presence board.

pub mod awareness;
pub mod document;

pub use awareness::PresenceBoard;
pub use document::{SeedAttempt, SharedDocument};
