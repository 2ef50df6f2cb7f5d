//! Runtime system
//!
//! This module contains the dependency graph and the affinity-thread scheduler.

pub mod dag;
pub mod error;
pub mod scheduler;
