//! Arena battle server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod battle;
pub mod config;
pub mod db;
pub mod routes;
pub mod state;
pub mod ws;
