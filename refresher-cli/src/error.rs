use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Refresh(#[from] refresher::RefreshError),

    #[error(transparent)]
    Pool(#[from] refresher::pool::PoolError),

    #[error(transparent)]
    Mailbox(#[from] refresher::mailbox::MailboxError),

    #[error(transparent)]
    Store(#[from] refresher::store::StoreError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
