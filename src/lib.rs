pub mod build;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod helpers;
pub mod output;
