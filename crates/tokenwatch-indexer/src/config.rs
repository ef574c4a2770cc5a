use anyhow::{Context, Result};
use std::env;

/// Worker environment: the indexer name it serves plus the database
/// credentials inherited from the container environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub indexer_name: String,
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,
    pub db_max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            indexer_name: env::var("INDEXER_NAME").context("INDEXER_NAME must be set")?,
            postgres_host: env::var("POSTGRES_HOST").context("POSTGRES_HOST must be set")?,
            postgres_port: env::var("POSTGRES_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()
                .context("Invalid POSTGRES_PORT")?,
            postgres_user: env::var("POSTGRES_USER").context("POSTGRES_USER must be set")?,
            postgres_password: env::var("POSTGRES_PASSWORD")
                .context("POSTGRES_PASSWORD must be set")?,
            postgres_db: env::var("POSTGRES_DB").context("POSTGRES_DB must be set")?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid DB_MAX_CONNECTIONS")?,
        })
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_host,
            self.postgres_port,
            self.postgres_db
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_assembles_from_parts() {
        let config = Config {
            indexer_name: "test-indexer".to_string(),
            postgres_host: "db".to_string(),
            postgres_port: 5432,
            postgres_user: "tokenwatch".to_string(),
            postgres_password: "secret".to_string(),
            postgres_db: "tokenwatch".to_string(),
            db_max_connections: 5,
        };
        assert_eq!(
            config.database_url(),
            "postgres://tokenwatch:secret@db:5432/tokenwatch"
        );
    }
}
