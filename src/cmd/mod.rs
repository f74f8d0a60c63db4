pub mod optimise;
pub mod results;
pub mod status;
pub mod worker;
