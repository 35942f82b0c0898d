//! Purpose: Library crate behind the `mantis-extract` CLI and its tests.
//! Exports: `core` (scanner, tokenizer, scalars, errors), `bugs`, `catalog`, `labels`, `notice`.
//! Role: Row extraction from mysqldump text plus the Mantis-specific record helpers.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
//! Invariants: Nothing in `core` writes files or talks to the network.
pub mod bugs;
pub mod catalog;
pub mod core;
pub mod labels;
pub mod notice;
