use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{table}: no row for the given key")]
    NotFound { table: &'static str },

    #[error("{table}: no row with id {id}")]
    IdNotFound { table: &'static str, id: u64 },

    #[error("{table}: secondary key already in use")]
    DuplicateKey { table: &'static str },

    #[error("{table}: primary id may not be changed by modify")]
    IdChanged { table: &'static str },

    #[error("table {0} is not registered")]
    UnknownTable(&'static str),

    #[error("table {0} is already registered")]
    TableExists(&'static str),

    #[error("set_revision requires an empty undo stack")]
    UndoStackNotEmpty,
}
