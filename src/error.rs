use thiserror::Error;

/// Failure of a single fetch attempt. Every variant is worth retrying.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("invalid proxy {proxy}: {reason}")]
    Proxy { proxy: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel request failed: {0}")]
    Transport(String),

    #[error("channel rejected message ({status}): {description}")]
    Api { status: u16, description: String },
}
