use crate::config::types::*;

/// Trait for merging optional configuration values
pub trait Merge<T> {
    fn merge(self, other: T) -> T;
}

impl<T> Merge<Option<T>> for Option<T> {
    fn merge(self, other: Option<T>) -> Option<T> {
        other.or(self)
    }
}

impl Merge<ConfigInput> for ConfigInput {
    fn merge(self, other: ConfigInput) -> ConfigInput {
        ConfigInput {
            remote: match (self.remote, other.remote) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
            directories: match (self.directories, other.directories) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
            ledger: match (self.ledger, other.ledger) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
            shadow: self.shadow.merge(other.shadow),
            differ: self.differ.merge(other.differ),
            docker: self.docker.merge(other.docker),
        }
    }
}

// Field-level merges for sections the CLI can partially override
impl RemoteInput {
    pub fn merge_with(self, other: RemoteInput) -> RemoteInput {
        RemoteInput {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            username: other.username.or(self.username),
            password: other.password.or(self.password),
            database: other.database.or(self.database),
            excluded_schemas: other.excluded_schemas.or(self.excluded_schemas),
        }
    }
}

impl DirectoriesInput {
    pub fn merge_with(self, other: DirectoriesInput) -> DirectoriesInput {
        DirectoriesInput {
            migrations_dir: other.migrations_dir.or(self.migrations_dir),
        }
    }
}

impl LedgerInput {
    pub fn merge_with(self, other: LedgerInput) -> LedgerInput {
        LedgerInput {
            schema: other.schema.or(self.schema),
            table: other.table.or(self.table),
        }
    }
}
