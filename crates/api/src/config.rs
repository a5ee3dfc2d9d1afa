use std::path::PathBuf;

use alaska_core::config::{env_list, env_or, env_parse, env_required, ConfigError};
use axum::http::HeaderValue;

/// API server configuration loaded from environment variables.
///
/// | Env Var                | Default                        |
/// |------------------------|--------------------------------|
/// | `DATABASE_URL`         | required                       |
/// | `HOST`                 | `0.0.0.0`                      |
/// | `PORT`                 | `5000`                         |
/// | `CORS_ORIGINS`         | `http://localhost:3000`        |
/// | `REQUEST_TIMEOUT_SECS` | `30`                           |
/// | `PROJECT_ROOT`         | `/alaska/data/projects`        |
///
/// Task settings are documented on [`TaskConfig`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Parent directory of project roots assigned on first start.
    pub project_root: PathBuf,
    pub tasks: TaskConfig,
}

/// Images and entry commands of the supervised background tasks.
///
/// | Env Var            | Default                       |
/// |--------------------|-------------------------------|
/// | `SCRIPT_IMAGE`     | `alaska/script`               |
/// | `COMPILE_SCRIPT`   | `python3 -u compile.py`       |
/// | `UPLOAD_SCRIPT`    | `python3 -u upload.py`        |
/// | `SESSION_IMAGE`    | `alaska/diff`                 |
/// | `SESSION_SCRIPT`   | `Rscript shiny.R`             |
/// | `INDEX_IMAGE`      | `alaska/index`                |
/// | `INDEX_SCRIPT`     | `python3 -u build_index.py`   |
/// | `GEO_FTP_HOST`     | `ftp-private.ncbi.nlm.nih.gov`|
/// | `GEO_FTP_USER`     | `geoftp`                      |
/// | `GEO_FTP_PASSWORD` | unset (uploads disabled)      |
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub script_image: String,
    pub compile_script: String,
    pub upload_script: String,
    pub session_image: String,
    pub session_script: String,
    pub index_image: String,
    pub index_script: String,
    pub geo_ftp: Option<GeoFtpConfig>,
}

/// Credentials for the submission FTP server. Passed to the upload sandbox
/// as environment variables, never on its command line.
#[derive(Clone)]
pub struct GeoFtpConfig {
    pub host: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for GeoFtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoFtpConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cors_origins = match env_list("CORS_ORIGINS") {
            list if list.is_empty() => vec!["http://localhost:3000".to_string()],
            list => list,
        };
        for origin in &cors_origins {
            if let Err(e) = origin.parse::<HeaderValue>() {
                return Err(ConfigError::Invalid {
                    name: "CORS_ORIGINS",
                    value: origin.clone(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(Self {
            database_url: env_required("DATABASE_URL")?,
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 5000)?,
            cors_origins,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 30)?,
            project_root: PathBuf::from(env_or("PROJECT_ROOT", "/alaska/data/projects")),
            tasks: TaskConfig::from_env(),
        })
    }
}

impl TaskConfig {
    pub fn from_env() -> Self {
        let geo_ftp = std::env::var("GEO_FTP_PASSWORD")
            .ok()
            .filter(|p| !p.is_empty())
            .map(|password| GeoFtpConfig {
                host: env_or("GEO_FTP_HOST", "ftp-private.ncbi.nlm.nih.gov"),
                user: env_or("GEO_FTP_USER", "geoftp"),
                password,
            });

        Self {
            script_image: env_or("SCRIPT_IMAGE", "alaska/script"),
            compile_script: env_or("COMPILE_SCRIPT", "python3 -u compile.py"),
            upload_script: env_or("UPLOAD_SCRIPT", "python3 -u upload.py"),
            session_image: env_or("SESSION_IMAGE", "alaska/diff"),
            session_script: env_or("SESSION_SCRIPT", "Rscript shiny.R"),
            index_image: env_or("INDEX_IMAGE", "alaska/index"),
            index_script: env_or("INDEX_SCRIPT", "python3 -u build_index.py"),
            geo_ftp,
        }
    }
}
