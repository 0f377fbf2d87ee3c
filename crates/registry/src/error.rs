use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("agent_id already registered: {0}")]
    InUse(String),
    #[error("no connection bound for agent_id: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
