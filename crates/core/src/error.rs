#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no queue name has been specified")]
    MissingQueueName,

    #[error("invalid worker event {0:?}, it must be of the form \"app@event\"")]
    InvalidWorkerEvent(String),

    #[error("worker pool queue limit must be greater than zero")]
    ZeroQueueLimit,

    #[error("no replica groups have been specified")]
    MissingGroups,

    #[error("fetch batch width must be greater than zero")]
    ZeroBatchWidth,
}
