pub mod history;
pub mod log;
pub mod report;
pub mod session;
pub mod store;
