// Replicated text data type: ids, operations, attribution and the RGA itself.

pub mod id;
pub mod op;
pub mod origin;
pub mod text;

pub use id::{ActorId, IdSpan, OpId, VersionVector};
pub use op::{OpKind, Operation};
pub use origin::{Author, AuthorType, EditOrigin};
pub use text::{ReplicatedText, TextError, Transaction};
