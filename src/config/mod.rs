//! Layered configuration: defaults, overridden by an INI file, overridden by
//! environment variables — the same three-tier precedence the teacher agent
//! used (`Config::from_config_file_and_environment`), restructured around
//! this engine's keys (§6 "Configuration").

mod error;
pub mod constants;

pub use error::{Error, ErrorKind, Result};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;

use self::constants::*;

/// Object-store access configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub endpoint_url: String,
    pub bucket: String,
    pub key_id: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_file_path: PathBuf,
    pub task_progress_dbs_dir: PathBuf,
    pub task_output_dir: PathBuf,
    pub task_log_dir: PathBuf,
    pub app_log_dir: PathBuf,
    pub replica_id: Option<String>,
    pub s3: S3Settings,
    pub log_level: String,
    pub segment_threshold_bytes: u64,
    pub progress_log_cadence_secs: u64,
    pub status_server_port: u16,
    pub reconciliation_dispatch_parallelism: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_file_path: PathBuf::from(CONFIG_DEFAULT_DATABASE_FILE_PATH),
            task_progress_dbs_dir: PathBuf::from(CONFIG_DEFAULT_TASK_PROGRESS_DBS_DIR),
            task_output_dir: PathBuf::from(CONFIG_DEFAULT_TASK_OUTPUT_DIR),
            task_log_dir: PathBuf::from(CONFIG_DEFAULT_TASK_LOG_DIR),
            app_log_dir: PathBuf::from(CONFIG_DEFAULT_APP_LOG_DIR),
            replica_id: None,
            s3: S3Settings {
                endpoint_url: String::new(),
                bucket: String::new(),
                key_id: String::new(),
                secret: String::new(),
            },
            log_level: CONFIG_DEFAULT_LOG_LEVEL.to_string(),
            segment_threshold_bytes: CONFIG_DEFAULT_SEGMENT_THRESHOLD_BYTES,
            progress_log_cadence_secs: CONFIG_DEFAULT_PROGRESS_LOG_CADENCE_SECS,
            status_server_port: CONFIG_DEFAULT_STATUS_SERVER_PORT,
            reconciliation_dispatch_parallelism: None,
        }
    }
}

impl Config {
    /// Loads config the way the teacher agent does: start from defaults,
    /// merge in the INI file if present, then apply any `HARVESTD_*`
    /// environment variable overrides, then apply `replica_id` namespacing.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = config_path {
            if path.exists() {
                config.merge_ini_file(path)?;
            }
        }

        config.apply_env_overrides();
        config.apply_replica_namespacing();
        Ok(config)
    }

    fn merge_ini_file(&mut self, path: &Path) -> Result<()> {
        let ini = Ini::load_from_file(path).map_err(ErrorKind::Parse)?;

        if let Some(section) = ini.section(Some(GLOBAL_SECTION)) {
            if let Some(v) = section.get("database_file_path") {
                self.database_file_path = PathBuf::from(v);
            }
            if let Some(v) = section.get("task_progress_dbs_dir") {
                self.task_progress_dbs_dir = PathBuf::from(v);
            }
            if let Some(v) = section.get("task_output_dir") {
                self.task_output_dir = PathBuf::from(v);
            }
            if let Some(v) = section.get("task_log_dir") {
                self.task_log_dir = PathBuf::from(v);
            }
            if let Some(v) = section.get("app_log_dir") {
                self.app_log_dir = PathBuf::from(v);
            }
            if let Some(v) = section.get("replica_id") {
                self.replica_id = Some(v.to_string());
            }
            if let Some(v) = section.get("log_level") {
                self.log_level = v.to_string();
            }
            if let Some(v) = section.get("segment_threshold_bytes") {
                self.segment_threshold_bytes = parse_key(GLOBAL_SECTION, "segment_threshold_bytes", v)?;
            }
            if let Some(v) = section.get("progress_log_cadence_secs") {
                self.progress_log_cadence_secs =
                    parse_key(GLOBAL_SECTION, "progress_log_cadence_secs", v)?;
            }
            if let Some(v) = section.get("status_server_port") {
                self.status_server_port = parse_key(GLOBAL_SECTION, "status_server_port", v)?;
            }
            if let Some(v) = section.get("reconciliation_dispatch_parallelism") {
                self.reconciliation_dispatch_parallelism =
                    Some(parse_key(GLOBAL_SECTION, "reconciliation_dispatch_parallelism", v)?);
            }
        }

        if let Some(section) = ini.section(Some(S3_SECTION)) {
            if let Some(v) = section.get("s3_endpoint_url") {
                self.s3.endpoint_url = v.to_string();
            }
            if let Some(v) = section.get("s3_bucket") {
                self.s3.bucket = v.to_string();
            }
            if let Some(v) = section.get("s3_key_id") {
                self.s3.key_id = v.to_string();
            }
            if let Some(v) = section.get("s3_secret") {
                self.s3.secret = v.to_string();
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}DATABASE_FILE_PATH")) {
            self.database_file_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}TASK_PROGRESS_DBS_DIR")) {
            self.task_progress_dbs_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}TASK_OUTPUT_DIR")) {
            self.task_output_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}TASK_LOG_DIR")) {
            self.task_log_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}APP_LOG_DIR")) {
            self.app_log_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}REPLICA_ID")) {
            self.replica_id = Some(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}LOG_LEVEL")) {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}S3_ENDPOINT_URL")) {
            self.s3.endpoint_url = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}S3_BUCKET")) {
            self.s3.bucket = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}S3_KEY_ID")) {
            self.s3.key_id = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}S3_SECRET")) {
            self.s3.secret = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}SEGMENT_THRESHOLD_BYTES")) {
            if let Ok(parsed) = v.parse() {
                self.segment_threshold_bytes = parsed;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}PROGRESS_LOG_CADENCE_SECS")) {
            if let Ok(parsed) = v.parse() {
                self.progress_log_cadence_secs = parsed;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}STATUS_SERVER_PORT")) {
            if let Ok(parsed) = v.parse() {
                self.status_server_port = parsed;
            }
        }
    }

    /// When `replica_id` is set, every path is namespaced under a
    /// subdirectory named after it, so that multiple replicas on the same
    /// host (or sharing a network volume) never collide (§6).
    fn apply_replica_namespacing(&mut self) {
        if let Some(ref id) = self.replica_id.clone() {
            self.database_file_path = namespace_file(&self.database_file_path, id);
            self.task_progress_dbs_dir = self.task_progress_dbs_dir.join(id);
            self.task_output_dir = self.task_output_dir.join(id);
            self.task_log_dir = self.task_log_dir.join(id);
            self.app_log_dir = self.app_log_dir.join(id);
        }
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.task_progress_dbs_dir)?;
        std::fs::create_dir_all(&self.task_output_dir)?;
        std::fs::create_dir_all(&self.task_log_dir)?;
        std::fs::create_dir_all(&self.app_log_dir)?;
        if let Some(parent) = self.database_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Namespaces a *file* path (as opposed to a directory) by inserting the
/// replica id as a parent directory, keeping the file name intact.
fn namespace_file(path: &Path, replica_id: &str) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let file_name = path.file_name().unwrap_or_default();
    parent.join(replica_id).join(file_name)
}

fn parse_key<T: FromStr>(section: &str, key: &str, raw: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e: T::Err| {
        ErrorKind::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.segment_threshold_bytes, CONFIG_DEFAULT_SEGMENT_THRESHOLD_BYTES);
        assert_eq!(config.progress_log_cadence_secs, 60);
        assert!(config.replica_id.is_none());
    }

    #[test]
    fn ini_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvestd.ini");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[global]\nsegment_threshold_bytes = 1024\nlog_level = DEBUG\n\n[s3]\ns3_bucket = my-bucket\n"
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.segment_threshold_bytes, 1024);
        assert_eq!(config.log_level, "DEBUG");
        assert_eq!(config.s3.bucket, "my-bucket");
    }

    #[test]
    fn replica_id_namespaces_paths() {
        let mut config = Config::default();
        config.replica_id = Some("replica-a".to_string());
        config.apply_replica_namespacing();
        assert_eq!(
            config.task_output_dir,
            PathBuf::from(CONFIG_DEFAULT_TASK_OUTPUT_DIR).join("replica-a")
        );
        assert_eq!(
            config.database_file_path,
            PathBuf::from("replica-a").join(CONFIG_DEFAULT_DATABASE_FILE_PATH)
        );
    }
}
