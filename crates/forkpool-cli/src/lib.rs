//! Shared pieces of the forkpool binaries.

pub mod echo;
