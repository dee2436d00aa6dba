use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    /// Host that file-proxy and file-message URLs are validated against.
    /// Requests for any other host are rejected before the proxy fetch is made.
    pub object_store_base_url: String,
    pub app_env: String,
    /// Comma-separated origins allowed to make cross-origin requests in
    /// production. Ignored in development, where CORS is permissive.
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dev_secret_change_in_production_min_32_chars".to_string());

        if jwt_secret.len() < 32 {
            tracing::warn!(
                "JWT_SECRET is shorter than 32 characters; this is unsafe outside local development"
            );
        }

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            jwt_secret,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            object_store_base_url: env::var("OBJECT_STORE_BASE_URL")
                .unwrap_or_else(|_| "https://objects.local".to_string()),
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_addr_combines_host_and_port() {
        let cfg = Config {
            database_url: "postgres://localhost/test".into(),
            jwt_secret: "x".repeat(32),
            server_host: "0.0.0.0".into(),
            server_port: 9090,
            object_store_base_url: "https://objects.local".into(),
            app_env: "development".into(),
            allowed_origins: vec![],
        };
        assert_eq!(cfg.server_addr(), "0.0.0.0:9090");
    }

    #[test]
    fn is_production_matches_app_env() {
        let mut cfg = Config {
            database_url: "postgres://localhost/test".into(),
            jwt_secret: "x".repeat(32),
            server_host: "0.0.0.0".into(),
            server_port: 9090,
            object_store_base_url: "https://objects.local".into(),
            app_env: "production".into(),
            allowed_origins: vec![],
        };
        assert!(cfg.is_production());
        cfg.app_env = "development".into();
        assert!(!cfg.is_production());
    }
}
