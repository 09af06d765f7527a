use std::str::FromStr;
use tonic::metadata::{
    MetadataKey, MetadataMap, MetadataValue,
    errors::{InvalidMetadataKey, InvalidMetadataValue},
};

#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidValue {
        key: String,
        source: InvalidMetadataValue,
    },
}

/// Converts `(key, value)` pairs into ASCII gRPC metadata.
///
/// Repeated keys are kept as repeated entries, in order.
pub fn metadata_map(headers: &[(String, String)]) -> Result<MetadataMap, MetadataError> {
    let mut metadata = MetadataMap::new();
    for (k, v) in headers {
        let key = MetadataKey::from_str(k).map_err(|source| MetadataError::InvalidKey {
            key: k.clone(),
            source,
        })?;
        let val = MetadataValue::from_str(v).map_err(|source| MetadataError::InvalidValue {
            key: k.clone(),
            source,
        })?;
        metadata.append(key, val);
    }
    Ok(metadata)
}
