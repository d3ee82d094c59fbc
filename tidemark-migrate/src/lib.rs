//! Tidemark Migration Library
//!
//! Helpers behind the `tidemark-migrate` CLI tool (main.rs).

pub mod generate;
