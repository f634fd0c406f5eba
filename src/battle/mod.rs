pub mod log;
pub mod service;
