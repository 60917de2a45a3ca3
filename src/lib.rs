pub mod api;
pub mod assembler;
pub mod catalog;
pub mod cli;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod marker;
pub mod sink;
