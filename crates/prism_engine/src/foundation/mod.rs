//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Math types and operations
//! - Tagged GPU memory accounting
//! - Collections and pooling
//! - Logging utilities

pub mod math;
pub mod memory;
pub mod collections;
pub mod logging;
