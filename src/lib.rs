pub mod aggregator;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod report;
pub mod retry;
pub mod sources;
pub mod summary;
pub mod template;
pub mod test_helpers;
