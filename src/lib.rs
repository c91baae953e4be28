pub mod command;
pub mod config;
pub mod engine;
pub mod feed;
pub mod memory;
pub mod model;
pub mod observability;
pub mod window;
