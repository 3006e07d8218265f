pub mod definitions;
pub mod exposition;
pub mod types;
