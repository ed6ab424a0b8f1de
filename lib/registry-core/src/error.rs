use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("this server [{myself}] is a follower and can't be written, leader is {}", .leader.as_deref().unwrap_or("unknown"))]
    NotLeader {
        myself: String,
        leader: Option<String>,
    },

    #[error("Invalid instance url: {0}")]
    InvalidInstanceUrl(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable code used in error response bodies
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotLeader { .. } => "NOT_LEADER",
            CoreError::InvalidInstanceUrl(_) => "INVALID_INSTANCE_URL",
            CoreError::Internal(_) => "INTERNAL",
        }
    }
}
