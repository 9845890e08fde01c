// Ghost agent: applies AI-generated line fixes to the shared document as an
// ordinary, attributed participant.

pub mod ghost;

pub use ghost::{FixError, FixReport, GhostAgent, GHOST_DISPLAY_NAME, GHOST_PARTICIPANT_ID};
