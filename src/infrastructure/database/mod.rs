use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};

use crate::common::config;
use crate::common::error::AppResult;

pub mod entities;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn DatabaseConnectionTrait>, DbErr>;
}

#[async_trait]
pub trait DatabaseConnectionTrait: Send + Sync {
    #[allow(dead_code)]
    async fn ping(&self) -> Result<(), DbErr>;
    fn clone_box(&self) -> Box<dyn DatabaseConnectionTrait>;
}

#[async_trait]
impl DatabaseConnectionTrait for DatabaseConnection {
    async fn ping(&self) -> Result<(), DbErr> {
        DatabaseConnection::ping(self).await
    }

    fn clone_box(&self) -> Box<dyn DatabaseConnectionTrait> {
        Box::new(self.clone())
    }
}

pub struct DefaultDatabaseConnector;

#[async_trait]
impl DatabaseConnector for DefaultDatabaseConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn DatabaseConnectionTrait>, DbErr> {
        let conn = sea_orm::Database::connect(url).await?;
        Ok(Box::new(conn))
    }
}

pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        let db = config::get_database_config();
        format!(
            "postgres://{}:{}@{}:{}/{}",
            db.user, db.password, db.host, db.port, db.name
        )
    })
}

pub struct DbConnection {
    connection: Box<dyn DatabaseConnectionTrait>,
}

impl Clone for DbConnection {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone_box(),
        }
    }
}

impl DbConnection {
    #[allow(clippy::disallowed_methods)]
    pub async fn new() -> AppResult<Self> {
        Self::new_with_connector(DefaultDatabaseConnector).await
    }

    #[allow(clippy::disallowed_methods)]
    async fn new_with_connector<T: DatabaseConnector>(connector: T) -> AppResult<Self> {
        let connection = connector.connect(&get_database_url()).await.map_err(|e| {
            tracing::error!("failed to connect to database: {}", e);
            e
        })?;
        Ok(Self { connection })
    }

    pub fn get_connection(&self) -> &dyn DatabaseConnectionTrait {
        self.connection.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use std::env;

    mock! {
        pub Connection {}

        #[async_trait]
        impl DatabaseConnectionTrait for Connection {
            async fn ping(&self) -> Result<(), DbErr>;
            fn clone_box(&self) -> Box<dyn DatabaseConnectionTrait>;
        }
    }

    fn cleanup_env() {
        env::remove_var("DATABASE_URL");
    }

    #[tokio::test]
    async fn default_database_url_built_from_config() {
        cleanup_env();
        let url = get_database_url();
        assert!(url.starts_with("postgres://"));
    }

    #[tokio::test]
    async fn successful_database_connection() {
        let mut mock_connector = MockDatabaseConnector::new();
        let mut mock_conn = MockConnection::new();

        mock_conn.expect_ping().returning(|| Ok(()));
        mock_conn
            .expect_clone_box()
            .returning(|| Box::new(MockConnection::new()));

        mock_connector
            .expect_connect()
            .return_once(move |_| Ok(Box::new(mock_conn)));

        let result = DbConnection::new_with_connector(mock_connector).await;
        assert!(result.is_ok());

        let db = result.unwrap();
        assert!(db.get_connection().ping().await.is_ok());
    }

    #[tokio::test]
    async fn failed_database_connection_surfaces_storage_error() {
        let mut mock_connector = MockDatabaseConnector::new();
        mock_connector.expect_connect().return_once(|_| {
            Err(DbErr::Conn(sea_orm::RuntimeErr::Internal(
                "mock connection error".to_string(),
            )))
        });

        let result = DbConnection::new_with_connector(mock_connector).await;
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind.code(), "storage_failure");
    }
}
