//! Host-based tests for the update scheduler
//! These tests run on the development machine, not on the ESP32

pub mod mocks;
