//! Feature query service
//!
//! Consumer-facing lookups layered on the feature cache: point inference,
//! full-namespace training export and namespace discovery. Requests naming an
//! unsupported feature are rejected with the list of supported names.

use crate::cache::{FeatureCache, NamespaceRecords};
use crate::error::FeatureStoreError;
use crate::types::{EntityKey, FeatureValue};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

/// Errors surfaced to lookup callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A required request field was missing
    #[error("Bad request! missing field {field}; supported feature names are: {supported:?}")]
    MissingField {
        field: &'static str,
        supported: Vec<String>,
    },

    /// Feature name is not a supported namespace
    #[error("Bad request! feature name {requested} is not supported; supported feature names are: {supported:?}")]
    UnsupportedFeature {
        requested: String,
        supported: Vec<String>,
    },

    /// Cache failure; details are logged, not returned
    #[error("Feature cache unavailable")]
    Internal,
}

impl QueryError {
    /// Whether the caller sent a bad request
    pub fn is_client_error(&self) -> bool {
        !matches!(self, QueryError::Internal)
    }

    /// Supported names carried by a client-input error
    pub fn supported(&self) -> &[String] {
        match self {
            QueryError::MissingField { supported, .. }
            | QueryError::UnsupportedFeature { supported, .. } => supported,
            QueryError::Internal => &[],
        }
    }
}

/// Read-side contract over the feature cache
#[derive(Clone)]
pub struct FeatureQueryService {
    cache: Arc<dyn FeatureCache>,
}

impl FeatureQueryService {
    pub fn new(cache: Arc<dyn FeatureCache>) -> Self {
        Self { cache }
    }

    /// Names of every currently supported feature namespace
    pub async fn discovery(&self) -> Result<Vec<String>, QueryError> {
        self.cache.supported_namespaces().await.map_err(internal)
    }

    /// Point lookup of one feature for one entity
    ///
    /// Returns `Ok(None)` both for keys stored without a value and for keys
    /// the cache has never seen; the latter is logged.
    pub async fn inference(
        &self,
        feature_name: Option<&str>,
        entity_key: Option<EntityKey>,
    ) -> Result<Option<FeatureValue>, QueryError> {
        let namespace = self.validate(feature_name).await?;
        let Some(key) = entity_key else {
            return Err(QueryError::MissingField {
                field: "baseFeature",
                supported: self.discovery().await?,
            });
        };

        match self.cache.get_one(&namespace, key).await {
            Ok(value) => Ok(value),
            Err(e @ FeatureStoreError::UnknownKey { .. }) => {
                warn!("{}", e);
                Ok(None)
            }
            Err(e @ FeatureStoreError::UnknownNamespace(_)) => {
                // deleted between validation and lookup
                warn!("{}", e);
                Ok(None)
            }
            Err(e) => Err(internal(e)),
        }
    }

    /// Full contents of one feature namespace for bulk export
    pub async fn training(&self, feature_name: Option<&str>) -> Result<NamespaceRecords, QueryError> {
        let namespace = self.validate(feature_name).await?;

        match self.cache.get_all(&namespace).await {
            Ok(records) => Ok(records),
            Err(e @ FeatureStoreError::UnknownNamespace(_)) => {
                warn!("{}", e);
                Ok(NamespaceRecords::new())
            }
            Err(e) => Err(internal(e)),
        }
    }

    async fn validate(&self, feature_name: Option<&str>) -> Result<String, QueryError> {
        let supported = self.discovery().await?;

        let Some(requested) = feature_name else {
            return Err(QueryError::MissingField {
                field: "featureName",
                supported,
            });
        };

        if supported.iter().any(|name| name == requested) {
            Ok(requested.to_string())
        } else {
            Err(QueryError::UnsupportedFeature {
                requested: requested.to_string(),
                supported,
            })
        }
    }
}

fn internal(err: FeatureStoreError) -> QueryError {
    error!("Feature cache failure while serving request: {}", err);
    QueryError::Internal
}
