pub mod cache;
pub mod config;
pub mod control;
pub mod error;
pub mod executor;
pub mod keygen;
pub mod languages;
pub mod sandbox;
pub mod selftest;
pub mod server;
