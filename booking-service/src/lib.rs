pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod services;
pub mod startup;
pub mod utils;
pub mod workflow;

pub use startup::{AppState, Application};
