pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("User password error: {0}")]
    UserPasswordError(#[from] argon2::password_hash::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid rating value: {0}")]
    InvalidRating(i64),

    #[error("Insufficient coins: need {needed}, have {available}")]
    InsufficientCoins { needed: i64, available: i64 },

    #[error("Chapter is not purchasable with coins")]
    NotPurchasable,

    #[error("Chapter must have at least one page")]
    NoPages,

    #[error("Invalid order by field: {0}")]
    InvalidOrderByField(String),

    #[error("Missing version in payload")]
    MissingVersion,

    #[error("Failed to update record {id} with version {version}")]
    FailedUpdate { id: i64, version: i64 },

    #[error("Invalid stored data: {0}")]
    InvalidData(#[from] serde_json::Error),
}
