//! Compiles the conway wasm crate and stages its web bundle.
//!
//! A build runs in two strictly ordered steps: the toolchain compiles the
//! crate into a wasm artifact plus loader shim ([`build::toolchain`]), then
//! the assembler bundles the entry script together with that artifact and
//! writes exactly two files under the profile's prefix ([`build::emit`]).

pub mod build;
pub mod config;
