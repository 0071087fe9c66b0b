pub mod cancel;
pub mod commands;
pub mod commit;
pub mod config;
pub mod constants;
pub mod db;
pub mod docker;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod progress;
pub mod templates;
