pub mod audit;
pub mod auth;
pub mod core;
pub mod students;
