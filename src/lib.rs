pub mod error;
pub mod types;
pub mod gateway;
pub mod sim;
pub mod ledger;
pub mod journal;
pub mod access;
pub mod custody;
pub mod config;
pub mod persist;
pub mod api;
