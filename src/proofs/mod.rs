//! Zero-knowledge proofs, made non-interactive with a transcript.
pub mod dlog;
