use clap::Args;
use database::Database;
use std::path::PathBuf;

pub mod auth;
pub mod cache;

use cache::SuggestionCache;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub suggestions: SuggestionCache,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        Self {
            db,
            config,
            suggestions: SuggestionCache::default(),
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct Config {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:cards.db")]
    pub database_url: String,

    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// HS256 secret shared with the service that issues bearer tokens.
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Directory that receives uploaded card pages; served under /uploads.
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Owner ids allowed to run maintenance operations.
    #[arg(long, env = "ADMIN_USERS", value_delimiter = ',')]
    pub admin_users: Vec<String>,
}

impl Config {
    pub fn is_admin(&self, owner_id: &str) -> bool {
        self.admin_users.iter().any(|admin| admin.trim() == owner_id)
    }
}
