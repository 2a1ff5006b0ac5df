//! Scoped, TTL-governed fragment cache backed by a persistent store and a static-file mirror.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
