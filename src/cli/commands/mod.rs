//! CLI command implementations

pub mod build;
pub mod cache;
pub mod config;
pub mod images;
pub mod init;
pub mod run;

pub use build::execute as build;
pub use cache::execute as cache;
pub use config::execute as config;
pub use images::execute as images;
pub use init::execute as init;
pub use run::execute as run;
