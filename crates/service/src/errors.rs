use common::pagination::PageLimitExceeded;
use models::errors::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("dependency error: {0}")]
    Dependency(String),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl ServiceError {
    /// Stable numeric code for external mapping/logging
    pub fn code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) | ServiceError::Model(ModelError::Validation(_)) => 1001,
            ServiceError::NotFound(_) => 1003,
            ServiceError::LimitExceeded(_) => 1005,
            ServiceError::Dependency(_) | ServiceError::Model(ModelError::Db(_)) => 1200,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ServiceError::Validation(_) | ServiceError::Model(ModelError::Validation(_)))
    }
}

impl From<PageLimitExceeded> for ServiceError {
    fn from(e: PageLimitExceeded) -> Self { Self::LimitExceeded(e.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_errors_keep_their_category_code() {
        let v: ServiceError = ModelError::Validation("name required".into()).into();
        assert_eq!(v.code(), 1001);
        assert!(v.is_validation());
        let d: ServiceError = ModelError::Db("connection reset".into()).into();
        assert_eq!(d.code(), 1200);
    }

    #[test]
    fn page_limit_maps_to_limit_exceeded() {
        let e: ServiceError = PageLimitExceeded { limit: 2000, max: 1000 }.into();
        assert!(matches!(e, ServiceError::LimitExceeded(_)));
        assert_eq!(e.code(), 1005);
    }
}
