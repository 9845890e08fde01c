// codesync-common: replicated text, room protocol and shared domain types.

pub mod crdt;
pub mod delta;
pub mod protocol;
pub mod types;
