// src/core/mod.rs
pub mod commands;
pub mod executor;
pub mod planner;
