mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;

pub use server::{build_app, run};
