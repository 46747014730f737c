use thiserror::Error;

/// Catalog fetch failures. The only error surfaced to the user, who may retry.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("catalog provider unreachable: {0}")]
    Unreachable(String),

    #[error("catalog provider returned status {0}")]
    Status(u16),

    #[error("catalog response could not be decoded: {0}")]
    Decode(String),

    #[error("malformed pack record at position {index}: {reason}")]
    Malformed { index: usize, reason: String },
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            ProviderError::Status(status.as_u16())
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("cover photo for pack {pack_id} could not be resolved: {reason}")]
pub struct PhotoResolutionError {
    pub pack_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageLoadError {
    #[error("image request failed: {0}")]
    Network(String),

    #[error("image server returned status {0}")]
    Status(u16),

    #[error("image could not be decoded: {0}")]
    Decode(String),

    #[error("invalid data uri: {0}")]
    InvalidDataUri(String),

    /// A previous load of this URL failed; only an explicit retry fetches it again.
    #[error("image previously failed to load: {0}")]
    Errored(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("failed to write {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("failed to serialize {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum WishlistError {
    #[error("wishlist used before it was loaded")]
    NotLoaded,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_error_names_the_record() {
        let err = ProviderError::Malformed {
            index: 3,
            reason: "missing field `city`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "malformed pack record at position 3: missing field `city`"
        );
    }

    #[test]
    fn storage_error_converts_into_wishlist_error() {
        let err: WishlistError = StorageError::Write {
            key: "wishlist".to_string(),
            reason: "disk full".to_string(),
        }
        .into();
        assert!(matches!(err, WishlistError::Storage(_)));
        assert_eq!(err.to_string(), "failed to write wishlist: disk full");
    }
}
