#![doc = "autoslice-core: core pipeline library for autoslice."]

//! This crate contains all the pipeline logic, data models and external-tool
//! contracts for autoslice. Endpoint-specific upload clients are not included
//! here; they live in the CLI crate behind the [`contract::PrintQueue`] trait.
//!
//! # Usage
//! Add this as a dependency for all shared inventory, conversion, slicing,
//! packing and scheduling code.

pub mod batch;
pub mod config;
pub mod contract;
pub mod convert;
pub mod inventory;
pub mod pipeline;
pub mod schedule;
pub mod slice;
