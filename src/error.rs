//! Error type shared by the tree builder, the search and the text format.

use thiserror::Error;

/// Everything that can go wrong while building, querying or (de)serializing a tree.
#[derive(Error, Debug)]
pub enum KdTreeError {
    /// The points handed to the builder cannot form a tree.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// A query was issued against a tree that has no root.
    #[error("Cannot search an empty tree")]
    EmptyTree,
    /// The query point does not have the tree's dimensionality.
    #[error("Dimension mismatch: tree has {expected} dimensions, query has {found}")]
    DimensionMismatch { expected: usize, found: usize },
    /// Persisted tree text that does not describe a valid tree.
    #[error("Malformed persisted tree: {0}")]
    MalformedPersistedTree(String),
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KdTreeError>;
