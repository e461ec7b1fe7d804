/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development; production
/// overrides them via the environment. Read once at process start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// SQLite URL shared with the worker processes.
    pub database_url: String,
    /// Queue the coordinator publishes envelopes to.
    pub queue_name: String,
    /// Allowed CORS origins, comma-separated in `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var        | Default                        |
    /// |----------------|--------------------------------|
    /// | `HOST`         | `0.0.0.0`                      |
    /// | `PORT`         | `8000`                         |
    /// | `DATABASE_URL` | `sqlite://conveyor.db?mode=rwc`|
    /// | `QUEUE_NAME`   | `executions`                   |
    /// | `CORS_ORIGINS` | `http://localhost:5173`        |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://conveyor.db?mode=rwc".into());

        let queue_name = std::env::var("QUEUE_NAME").unwrap_or_else(|_| "executions".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host,
            port,
            database_url,
            queue_name,
            cors_origins,
        }
    }
}
