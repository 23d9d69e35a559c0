// src/lib.rs
pub mod candles;
pub mod config;
pub mod errors;
pub mod execution;
pub mod patterns;
pub mod pipeline;
pub mod risk;
pub mod scoring;
pub mod shield;
pub mod sink;
pub mod types;
