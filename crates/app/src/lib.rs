#![deny(unsafe_code)]

pub mod controller;
pub mod error;
pub mod poller;
pub mod render;
pub mod repl;
pub mod settings;
