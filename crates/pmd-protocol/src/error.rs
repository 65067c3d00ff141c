use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("send template '{0}' has {1} '%s' slots, expected 0 or 1")]
    TooManySlots(String, usize),

    #[error("send template requires a target but none was supplied")]
    MissingTarget,

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}
