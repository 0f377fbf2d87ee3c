use meshhub_protocol::error_codes;
use thiserror::Error;

/// Mod-domain errors, each carrying a stable wire error code per the error
/// taxonomy's "mod-domain errors" class: reported inside the mod's own
/// response envelope, never surfaced as a protocol or transport error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown_channel")]
    UnknownChannel,
    #[error("thread_depth_exceeded")]
    ThreadDepthExceeded,
    #[error("file_too_large")]
    FileTooLarge,
    #[error("not_found")]
    NotFound,
    #[error("bad_request")]
    BadRequest,
    #[error("unknown_command")]
    UnknownCommand,
}

impl Error {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownChannel => error_codes::UNKNOWN_CHANNEL,
            Self::ThreadDepthExceeded => error_codes::THREAD_DEPTH_EXCEEDED,
            Self::FileTooLarge => error_codes::FILE_TOO_LARGE,
            Self::NotFound => error_codes::NOT_FOUND,
            Self::BadRequest => error_codes::BAD_REQUEST,
            Self::UnknownCommand => error_codes::UNKNOWN_COMMAND,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
