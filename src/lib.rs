#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::similar_names)]

pub mod cli;

pub mod archive;
pub mod config;
pub mod credential;
pub mod directory;
pub mod error;
pub mod ops;
pub mod remote;
pub mod retention;

mod format;
mod logger;
mod task;

#[cfg(test)]
mod testing;
