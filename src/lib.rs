pub mod config;
pub mod error;
pub mod geometry;
pub mod optimizer;
pub mod results;
pub mod scenario;
pub mod tools;
pub mod worker;
