//! `webscout` tool surface (library half of the binary).
//!
//! The `webscout` binary is the primary entrypoint (CLI + MCP stdio). The façade
//! and envelope live here so they can be embedded and tested without a process.

pub mod envelope;
pub mod facade;
