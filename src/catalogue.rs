//! Entity resolution: mapping a logical entity id to the physical
//! resources it is served by.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("entity '{0}' not found")]
    NotFound(String),
    #[error("catalogue lookup failed: {0}")]
    Lookup(String),
}

/// What a lookup resolves to: the physical resource ids to query for one
/// logical entity. Composite entities (resource groups) resolve to several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub entity_id: String,
    pub resources: Vec<String>,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, entity_id: &str) -> Result<EntityDescriptor, ResolveError>;
}

/// Treats every entity id as its own single physical resource. The default
/// for deployments where callers already hold resource-level ids and no
/// catalogue round trip is wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectResolver;

#[async_trait]
impl Resolver for DirectResolver {
    async fn lookup(&self, entity_id: &str) -> Result<EntityDescriptor, ResolveError> {
        if entity_id.is_empty() {
            return Err(ResolveError::NotFound(entity_id.to_string()));
        }
        Ok(EntityDescriptor {
            entity_id: entity_id.to_string(),
            resources: vec![entity_id.to_string()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_resolver_passes_the_id_through() {
        let descriptor = DirectResolver
            .lookup("rs.test/sensors/aqm-1")
            .await
            .unwrap();
        assert_eq!(descriptor.entity_id, "rs.test/sensors/aqm-1");
        assert_eq!(descriptor.resources, ["rs.test/sensors/aqm-1"]);
    }

    #[tokio::test]
    async fn test_direct_resolver_rejects_an_empty_id() {
        let err = DirectResolver.lookup("").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }
}
