//! Building blocks of an upload → table run.
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ stage (×2, in a workspace) ──▶ table
//! (stage)    (external processes)           (transcode)
//! ```
//!
//! 1. [`upload`]    — validate the declared media type and persist the payload
//! 2. [`workspace`] — per-run job directory and scoped artifact cleanup
//! 3. [`stage`]     — spawn one external program with a timeout and judge
//!    its exit status
//! 4. [`table`]     — parse delimited text with a header line into records
//!
//! Sequencing lives in [`crate::run`]; response shaping in [`crate::deliver`].

pub mod stage;
pub mod table;
pub mod upload;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;
