pub mod config;
pub mod errors;
pub mod events;
pub mod media;
pub mod models;
pub mod outcome;
pub mod providers;
pub mod request;
