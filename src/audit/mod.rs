//! Operation journal for dotbackup
//!
//! Every completed mutation of a backup root appends one line to
//! `journal.log`. The journal is append-only; `history` reads it back.

mod entry;
mod logger;

pub use entry::{JournalEntry, Operation};
pub use logger::Journal;
