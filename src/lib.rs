#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names
)]

pub mod app;
pub mod backend;
pub mod classifier;
pub mod cli;
pub mod collab;
pub mod config;
pub mod delegation;
pub mod error;
pub mod orchestrator;
pub mod persona;
pub mod session;
pub mod task;

pub use error::{ErrorKind, Result, TrinitasError};
