pub mod backup;
pub mod logging;
pub mod remote;
pub mod tasks;
pub mod workflow;
