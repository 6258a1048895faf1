//! Benchmark utilities for the `rusty_ecs` core.
//!
//! This crate provides the component types shared by the Criterion micro-benchmarks in
//! `benches/ecs_micro.rs`: add/get/remove throughput for both container strategies
//! ([`rusty_ecs::AvlContainer`] and [`rusty_ecs::HashContainer`]), measured through the same
//! entity façade a host application would use.
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench -p rusty_ecs_bench
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports for visualization.

pub mod components;
