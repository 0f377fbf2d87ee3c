use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sender_mismatch")]
    SenderMismatch,
}

pub type Result<T> = std::result::Result<T, Error>;
