pub mod commit;

pub use commit::cmd_remote_commit;
