pub mod agent;
pub mod config;
pub mod controller;
pub mod critique;
pub mod error;
pub mod router;
pub mod runs;
pub mod sandbox;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod steps;
