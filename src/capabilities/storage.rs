use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Namespaces partition the durable store. Per-user data is keyed inside the
/// namespace with the user id so records never leak across accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreNamespace {
    Session,
    Incident,
    Forms,
}

impl StoreNamespace {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Incident => "incident",
            Self::Forms => "forms",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    namespace: StoreNamespace,
    key: String,
}

impl StorageKey {
    pub fn new(namespace: StoreNamespace, key: impl Into<String>) -> Result<Self, StorageError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    #[must_use]
    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    #[must_use]
    pub const fn namespace(&self) -> StoreNamespace {
        self.namespace
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn validate_key(key: &str) -> Result<(), StorageError> {
        if key.trim().is_empty() {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(StorageError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {MAX_KEY_LENGTH} bytes"),
            });
        }

        if key.contains('\0') || key.contains("..") || key.starts_with('/') {
            return Err(StorageError::InvalidKey {
                key: key.replace('\0', "\\0"),
                reason: "key contains forbidden characters".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum StorageOperation {
    Get { key: StorageKey },
    Set { key: StorageKey, value: Vec<u8> },
    Delete { key: StorageKey },
}

impl StorageOperation {
    pub fn set_json<T: Serialize>(key: StorageKey, value: &T) -> Result<Self, StorageError> {
        let value = serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
            message: e.to_string(),
        })?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(StorageError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }
        Ok(Self::Set { key, value })
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage backend error: {message} (retryable: {retryable})")]
    Backend { message: String, retryable: bool },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl StorageError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { retryable: true, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StorageOutput {
    Value(Option<Vec<u8>>),
    Written,
    Deleted { existed: bool },
}

impl StorageOutput {
    /// Decode a `Value` output, treating every failure mode as "no stored
    /// value". Storage is never allowed to take the app down.
    pub fn decode_or_none<T: DeserializeOwned>(result: StorageResult) -> Option<T> {
        match result {
            Ok(Self::Value(Some(bytes))) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(error = %e, "discarding undecodable stored value");
                    None
                }
            },
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "storage read failed, proceeding without value");
                None
            }
        }
    }
}

pub type StorageResult = Result<StorageOutput, StorageError>;

impl Operation for StorageOperation {
    type Output = StorageResult;
}

pub struct Storage<Ev> {
    context: CapabilityContext<StorageOperation, Ev>,
}

impl<Ev> Clone for Storage<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for Storage<Ev> {
    type Operation = StorageOperation;
    type MappedSelf<MappedEv> = Storage<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Storage::new(self.context.map_event(f))
    }
}

impl<Ev> Storage<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<StorageOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn get<F>(&self, key: StorageKey, make_event: F)
    where
        F: Fn(StorageResult) -> Ev + Send + Sync + 'static,
    {
        self.run(StorageOperation::Get { key }, make_event);
    }

    pub fn set<F>(&self, key: StorageKey, value: Vec<u8>, make_event: F)
    where
        F: Fn(StorageResult) -> Ev + Send + Sync + 'static,
    {
        self.run(StorageOperation::Set { key, value }, make_event);
    }

    pub fn delete<F>(&self, key: StorageKey, make_event: F)
    where
        F: Fn(StorageResult) -> Ev + Send + Sync + 'static,
    {
        self.run(StorageOperation::Delete { key }, make_event);
    }

    /// Submit a pre-built operation, e.g. one from `StorageOperation::set_json`.
    pub fn run<F>(&self, operation: StorageOperation, make_event: F)
    where
        F: Fn(StorageResult) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation_rejects_empty_and_whitespace() {
        assert!(StorageKey::new(StoreNamespace::Session, "").is_err());
        assert!(StorageKey::new(StoreNamespace::Session, "   ").is_err());
    }

    #[test]
    fn key_validation_rejects_traversal_and_null() {
        assert!(StorageKey::new(StoreNamespace::Incident, "../other").is_err());
        assert!(StorageKey::new(StoreNamespace::Incident, "a\0b").is_err());
        assert!(StorageKey::new(StoreNamespace::Incident, "/abs").is_err());
    }

    #[test]
    fn key_raw_includes_namespace_prefix() {
        let key = StorageKey::new(StoreNamespace::Forms, "user-9").unwrap();
        assert_eq!(key.raw(), "forms:user-9");
    }

    #[test]
    fn set_json_rejects_oversized_values() {
        let key = StorageKey::new(StoreNamespace::Incident, "user-1").unwrap();
        let blob = vec![0u8; MAX_VALUE_SIZE + 1];
        let result = StorageOperation::set_json(key, &blob);
        assert!(matches!(result, Err(StorageError::ValueTooLarge { .. })));
    }

    #[test]
    fn decode_or_none_swallows_read_failures() {
        let err: StorageResult = Err(StorageError::Backend {
            message: "disk".into(),
            retryable: true,
        });
        assert_eq!(StorageOutput::decode_or_none::<u32>(err), None);

        let garbage: StorageResult = Ok(StorageOutput::Value(Some(b"not json".to_vec())));
        assert_eq!(StorageOutput::decode_or_none::<u32>(garbage), None);

        let missing: StorageResult = Ok(StorageOutput::Value(None));
        assert_eq!(StorageOutput::decode_or_none::<u32>(missing), None);

        let good: StorageResult = Ok(StorageOutput::Value(Some(b"17".to_vec())));
        assert_eq!(StorageOutput::decode_or_none::<u32>(good), Some(17));
    }

    #[test]
    fn backend_retryability_is_preserved() {
        let transient = StorageError::Backend {
            message: "busy".into(),
            retryable: true,
        };
        let permanent = StorageError::Backend {
            message: "corrupt".into(),
            retryable: false,
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(!StorageError::Serialization {
            message: "x".into()
        }
        .is_retryable());
    }
}
