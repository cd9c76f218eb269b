pub mod advisor;
pub mod config;
pub mod format;
pub mod openrouter;
pub mod persona;
pub mod ratelimit;
