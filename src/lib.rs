//! Caching and consistency layer for a page discussion overlay.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
