pub mod categories;
pub mod config;
pub mod events;
pub mod history;
pub mod models;
pub mod runs;
