//! Default values and well-known string constants for [`super::Config`].

/// INI section holding paths and global knobs.
pub const GLOBAL_SECTION: &str = "global";

/// INI section holding object-store credentials.
pub const S3_SECTION: &str = "s3";

/// Environment variable prefix used to override any config key.
pub const ENV_PREFIX: &str = "HARVESTD_";

pub const CONFIG_DEFAULT_DATABASE_FILE_PATH: &str = "harvestd.db";
pub const CONFIG_DEFAULT_TASK_PROGRESS_DBS_DIR: &str = "task_progress";
pub const CONFIG_DEFAULT_TASK_OUTPUT_DIR: &str = "task_output";
pub const CONFIG_DEFAULT_TASK_LOG_DIR: &str = "task_logs";
pub const CONFIG_DEFAULT_APP_LOG_DIR: &str = "logs";

/// Segment rotation threshold, in bytes of *uncompressed* output (§4.3).
/// Chosen assuming a ~3:1 zstd compression ratio on line-delimited JSON, so
/// that compressed segments land around 500 MiB as well.
pub const CONFIG_DEFAULT_SEGMENT_THRESHOLD_BYTES: u64 = 500 * 1024 * 1024;

/// How often (in seconds) a running processor may log its progress, and
/// only then if the progress snapshot actually changed (§4.5).
pub const CONFIG_DEFAULT_PROGRESS_LOG_CADENCE_SECS: u64 = 60;

pub const CONFIG_DEFAULT_STATUS_SERVER_PORT: u16 = 9029;

pub const CONFIG_DEFAULT_LOG_LEVEL: &str = "INFO";

/// Pattern used by the app-wide rolling file appender.
pub const APP_LOG_FORMAT: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {l} [{M}] {m}{n}";

/// Pattern used by each task's dedicated log appender; task id is injected
/// via the `log-mdc` "task_id" key rather than baked into the pattern.
pub const TASK_LOG_FORMAT: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {l} {X(task_id)} {m}{n}";
