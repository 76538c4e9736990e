//! imgpkg CLI - package, distribute and relocate bundles.

pub mod commands;
