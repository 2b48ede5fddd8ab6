//! Integration-style tests: indexer pipeline scenarios and supervisor
//! lifecycle behavior, driven by mock stores, mock embedders, and scripted
//! session runners.

pub mod helpers;

mod indexer_tests;
mod supervisor_tests;
