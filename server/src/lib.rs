//! ShiftSync presence and progression server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod api;
pub mod auth;
pub mod config;
pub mod curriculum;
pub mod db;
pub mod gate;
pub mod presence;
pub mod proto;
pub mod routes;
pub mod state;
pub mod store;
pub mod sync;
pub mod ws;
