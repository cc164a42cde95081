pub mod actors;
pub mod constants;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod grid;
pub mod level;
pub mod loader;
pub mod rng;
pub mod terminal;
pub mod types;
