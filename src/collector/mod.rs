pub mod coordinator;
pub mod groups;
pub mod rate;
pub mod snapshot;
