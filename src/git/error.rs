//! Git error types.

#[derive(Debug)]
pub enum GitError {
    /// A git (or related OS) command exited non-zero or could not be spawned.
    CommandFailed(String),
    /// Output from a git command could not be parsed as expected.
    ParseError(String),
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::CommandFailed(msg) => write!(f, "{}", msg),
            GitError::ParseError(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for GitError {}
