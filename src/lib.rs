// Library exports for treehole
// The binary and the integration tests both build on these modules

pub mod anonyname;
pub mod config;
pub mod db;
pub mod error;
pub mod floor;
pub mod mention;
pub mod search;
pub mod state;
pub mod views;
