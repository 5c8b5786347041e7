use crate::{
    error::DbError, mysql::MySqlConnector, postgres::PgConnector, source::SourceConnector,
    target::TargetConnector,
};
use async_trait::async_trait;
use model::spec::connection::{ConnectionDescriptor, Driver};
use std::sync::Arc;
use tracing::info;

/// Builds connectors from job connection descriptors. The engine depends
/// on this trait, not the concrete drivers, so tests can substitute
/// in-memory endpoints.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn source(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn SourceConnector>, DbError>;

    async fn target(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn TargetConnector>, DbError>;
}

/// Driver selection per the descriptor contract: explicit hint first,
/// URL syntax otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlConnectorFactory;

impl SqlConnectorFactory {
    async fn mysql(&self, descriptor: &ConnectionDescriptor) -> Result<MySqlConnector, DbError> {
        let url = descriptor.url(Driver::MySql);
        MySqlConnector::connect(&url).map_err(|e| e.to_db_error())
    }

    async fn postgres(&self, descriptor: &ConnectionDescriptor) -> Result<PgConnector, DbError> {
        let url = descriptor.url(Driver::Postgres);
        PgConnector::connect(&url).await.map_err(|e| e.to_db_error())
    }

    fn resolve(&self, descriptor: &ConnectionDescriptor) -> Result<Driver, DbError> {
        let driver = descriptor
            .resolve_driver()
            .map_err(|e| DbError::Unknown(e.to_string()))?;
        info!(endpoint = %descriptor.endpoint(), ?driver, "resolved connector driver");
        Ok(driver)
    }
}

#[async_trait]
impl ConnectorFactory for SqlConnectorFactory {
    async fn source(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn SourceConnector>, DbError> {
        match self.resolve(descriptor)? {
            Driver::MySql => Ok(Arc::new(self.mysql(descriptor).await?)),
            Driver::Postgres => Ok(Arc::new(self.postgres(descriptor).await?)),
        }
    }

    async fn target(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn TargetConnector>, DbError> {
        match self.resolve(descriptor)? {
            Driver::MySql => Ok(Arc::new(self.mysql(descriptor).await?)),
            Driver::Postgres => Ok(Arc::new(self.postgres(descriptor).await?)),
        }
    }
}
