//! Shared bootstrap helpers for Nightwatch binaries

pub mod bootstrap;
