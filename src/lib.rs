#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod catalog;
pub mod cli;
pub mod config;
pub mod entities;
pub mod error;
pub mod server;
pub mod services;
pub mod sources;
pub mod store;

mod render;
mod transform;
mod utils;
