//! services/api/src/lib.rs

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;

#[cfg(test)]
pub(crate) mod test_support;
