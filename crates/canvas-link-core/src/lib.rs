//! Core types, config, errors, and wire protocol for canvas-link.

pub mod canvas;
pub mod config;
pub mod error;
pub mod protocol;
