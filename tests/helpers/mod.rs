// Shared test infrastructure: a fully wired engine with a manual clock,
// recording connector, and configurable lookup directories, plus document
// builders for literal scenario inputs.

pub mod documents;
pub mod harness;

pub use documents::*;
pub use harness::*;
