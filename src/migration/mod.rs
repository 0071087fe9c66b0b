pub mod parsing;

pub use parsing::{
    LocalMigration, current_timestamp, extract_timestamp, is_legacy_init, load_local_migrations,
    migrations_to_replay, parse_migration_filename, remote_commit_filename,
};
