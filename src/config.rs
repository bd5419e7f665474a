use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::combine::CombineSettings;
use crate::constants::*;
use crate::reencode::ReencodePolicy;
use crate::silence::SilenceSettings;
use crate::wav::PcmFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Plain files under `root`
    Local,
    /// Supabase-style storage HTTP API
    Http,
}

fn default_port() -> u16 {
    3000
}

/// Service configuration file structure
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub combine: CombineConfig,
    #[serde(default)]
    pub silence: SilenceConfig,
    /// Transcription trigger (disabled when the section or its url is absent)
    pub transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// API server port (default: 3000)
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Maps to the [database] section
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    /// SQLite file (sqlite backend)
    pub sqlite_path: Option<PathBuf>,
    /// Base URL without password or database, e.g. postgres://user@host:5432
    pub postgres_url: Option<String>,
    /// Database name (postgres backend)
    pub postgres_database: Option<String>,
    /// Profile under [postgres.<profile>] in the credentials file
    pub credential_profile: Option<String>,
}

/// Maps to the [storage] section
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory (local backend)
    pub root: Option<PathBuf>,
    /// Storage API base URL, e.g. https://xyz.supabase.co/storage/v1 (http backend)
    pub url: Option<String>,
    /// Bucket holding chunks and combined recordings (http backend)
    pub bucket: Option<String>,
    /// Profile under [storage.<profile>] in the credentials file (http backend)
    pub credential_profile: Option<String>,
    /// Per-request timeout in seconds (default: 60)
    pub request_timeout_secs: Option<u64>,
}

/// Maps to the [recording] section: format of PCM chunks produced by clients
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RecordingConfig {
    /// Default: 48000
    pub sample_rate: Option<u32>,
    /// Default: 1
    pub channels: Option<u16>,
    /// Default: 16
    pub bits_per_sample: Option<u16>,
}

/// Maps to the [combine] section
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CombineConfig {
    /// Chunks downloaded concurrently per batch (default: 50)
    pub download_batch_size: Option<usize>,
    /// never, when_needed or always (default: when_needed)
    pub reencode: Option<ReencodePolicy>,
    /// Audio codec of re-encoded recordings (default: libopus)
    pub reencode_codec: Option<String>,
    /// Bitrate of re-encoded recordings (default: 64k)
    pub reencode_bitrate: Option<String>,
    /// ffmpeg binary (default: ffmpeg from PATH)
    pub ffmpeg_path: Option<PathBuf>,
    /// Wall-clock limit for one ffmpeg run (default: 300)
    pub external_timeout_secs: Option<u64>,
    /// Default: 30
    pub heartbeat_interval_secs: Option<u64>,
    /// Processing jobs without a heartbeat for this long are failed (default: 600)
    pub stale_after_secs: Option<u64>,
    /// Default: 60
    pub reaper_interval_secs: Option<u64>,
    /// Parent directory for scratch files (default: system temp dir)
    pub temp_dir: Option<PathBuf>,
}

/// Maps to the [silence] section
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SilenceConfig {
    /// Default: -50
    pub noise_floor_db: Option<f64>,
    /// Default: 0.5
    pub min_silence_secs: Option<f64>,
}

/// Maps to the [transcription] section
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    pub url: Option<String>,
    /// Profile under [transcription.<profile>] holding the bearer key
    pub credential_profile: Option<String>,
    /// Default: 30
    pub request_timeout_secs: Option<u64>,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.validate_database()?;
        self.validate_storage()?;
        self.validate_recording()?;
        self.validate_combine()?;
        self.validate_silence()?;
        Ok(())
    }

    fn validate_database(&self) -> Result<(), String> {
        let db = &self.database;
        match db.backend {
            DatabaseBackend::Sqlite => {
                if db.sqlite_path.is_none() {
                    return Err("[database] backend = \"sqlite\" requires sqlite_path".to_string());
                }
            }
            DatabaseBackend::Postgres => {
                if db.postgres_url.is_none()
                    || db.postgres_database.is_none()
                    || db.credential_profile.is_none()
                {
                    return Err(
                        "[database] backend = \"postgres\" requires postgres_url, postgres_database and credential_profile"
                            .to_string(),
                    );
                }
            }
        }
        Ok(())
    }

    fn validate_storage(&self) -> Result<(), String> {
        let storage = &self.storage;
        match storage.backend {
            StorageBackend::Local => {
                if storage.root.is_none() {
                    return Err("[storage] backend = \"local\" requires root".to_string());
                }
            }
            StorageBackend::Http => {
                if storage.url.is_none()
                    || storage.bucket.is_none()
                    || storage.credential_profile.is_none()
                {
                    return Err(
                        "[storage] backend = \"http\" requires url, bucket and credential_profile"
                            .to_string(),
                    );
                }
            }
        }
        if storage.request_timeout_secs == Some(0) {
            return Err("[storage] request_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    fn validate_recording(&self) -> Result<(), String> {
        let format = self.pcm_format();
        if format.sample_rate == 0 || format.sample_rate > MAX_SAMPLE_RATE {
            return Err(format!(
                "[recording] sample_rate must be between 1 and {}, got {}",
                MAX_SAMPLE_RATE, format.sample_rate
            ));
        }
        // A canonical 44-byte header only describes mono or stereo PCM
        if !(1..=2).contains(&format.channels) {
            return Err(format!(
                "[recording] channels must be 1 or 2, got {}",
                format.channels
            ));
        }
        if format.bits_per_sample != 16 {
            return Err(format!(
                "[recording] bits_per_sample must be 16, got {}",
                format.bits_per_sample
            ));
        }
        Ok(())
    }

    fn validate_combine(&self) -> Result<(), String> {
        let c = &self.combine;
        let positive = [
            ("download_batch_size", c.download_batch_size.map(|v| v as u64)),
            ("external_timeout_secs", c.external_timeout_secs),
            ("heartbeat_interval_secs", c.heartbeat_interval_secs),
            ("stale_after_secs", c.stale_after_secs),
            ("reaper_interval_secs", c.reaper_interval_secs),
        ];
        for (name, value) in positive {
            if value == Some(0) {
                return Err(format!("[combine] {} must be greater than 0", name));
            }
        }

        let settings = self.combine_settings();
        if settings.stale_after <= settings.heartbeat_interval {
            return Err(format!(
                "[combine] stale_after_secs ({}) must exceed heartbeat_interval_secs ({})",
                settings.stale_after.as_secs(),
                settings.heartbeat_interval.as_secs()
            ));
        }
        Ok(())
    }

    fn validate_silence(&self) -> Result<(), String> {
        let s = self.silence_settings();
        if s.noise_floor_db >= 0.0 {
            return Err(format!(
                "[silence] noise_floor_db must be negative, got {}",
                s.noise_floor_db
            ));
        }
        if s.min_silence_secs <= 0.0 {
            return Err(format!(
                "[silence] min_silence_secs must be positive, got {}",
                s.min_silence_secs
            ));
        }
        Ok(())
    }

    pub fn pcm_format(&self) -> PcmFormat {
        let r = &self.recording;
        PcmFormat {
            sample_rate: r.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            channels: r.channels.unwrap_or(DEFAULT_CHANNELS),
            bits_per_sample: r.bits_per_sample.unwrap_or(DEFAULT_BITS_PER_SAMPLE),
        }
    }

    pub fn combine_settings(&self) -> CombineSettings {
        let c = &self.combine;
        CombineSettings {
            format: self.pcm_format(),
            download_batch_size: c.download_batch_size.unwrap_or(DEFAULT_DOWNLOAD_BATCH_SIZE),
            reencode: c.reencode.unwrap_or_default(),
            heartbeat_interval: Duration::from_secs(
                c.heartbeat_interval_secs
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            ),
            stale_after: Duration::from_secs(c.stale_after_secs.unwrap_or(DEFAULT_STALE_AFTER_SECS)),
        }
    }

    pub fn silence_settings(&self) -> SilenceSettings {
        SilenceSettings {
            noise_floor_db: self.silence.noise_floor_db.unwrap_or(DEFAULT_NOISE_FLOOR_DB),
            min_silence_secs: self.silence.min_silence_secs.unwrap_or(DEFAULT_MIN_SILENCE_SECS),
        }
    }

    pub fn ffmpeg_path(&self) -> PathBuf {
        self.combine
            .ffmpeg_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffmpeg"))
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(
            self.combine
                .external_timeout_secs
                .unwrap_or(DEFAULT_EXTERNAL_TIMEOUT_SECS),
        )
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(
            self.combine
                .reaper_interval_secs
                .unwrap_or(DEFAULT_REAPER_INTERVAL_SECS),
        )
    }

    pub fn reencode_codec(&self) -> &str {
        self.combine
            .reencode_codec
            .as_deref()
            .unwrap_or(DEFAULT_REENCODE_CODEC)
    }

    pub fn reencode_bitrate(&self) -> &str {
        self.combine
            .reencode_bitrate
            .as_deref()
            .unwrap_or(DEFAULT_REENCODE_BITRATE)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.request_timeout_secs.unwrap_or(60))
    }
}

/// Read, parse and validate a config file
pub fn load_config(path: &Path) -> Result<ServiceConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
    let config: ServiceConfig = toml::from_str(&content)
        .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;
    config
        .validate()
        .map_err(|e| format!("Invalid config file '{}': {}", path.display(), e))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[database]
backend = "sqlite"
sqlite_path = "data/recorder.sqlite"

[storage]
backend = "local"
root = "data/objects"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ServiceConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.pcm_format(), PcmFormat::default());
        let settings = config.combine_settings();
        assert_eq!(settings.download_batch_size, 50);
        assert_eq!(settings.reencode, ReencodePolicy::WhenNeeded);
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(settings.stale_after, Duration::from_secs(600));
        assert_eq!(config.external_timeout(), Duration::from_secs(300));
        assert_eq!(config.silence_settings(), SilenceSettings::default());
        assert_eq!(config.reencode_codec(), "libopus");
        assert!(config.transcription.is_none());
    }

    #[test]
    fn test_full_config_parses() {
        let config: ServiceConfig = toml::from_str(
            r#"
[server]
port = 8088

[database]
backend = "postgres"
postgres_url = "postgres://recorder@db:5432"
postgres_database = "voice"
credential_profile = "main"

[storage]
backend = "http"
url = "https://storage.example.com/storage/v1"
bucket = "audio"
credential_profile = "supabase"

[combine]
reencode = "never"
download_batch_size = 10

[silence]
noise_floor_db = -40.0
min_silence_secs = 1.0

[transcription]
url = "https://transcribe.example.com/jobs"
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.combine_settings().reencode, ReencodePolicy::Never);
        assert_eq!(config.silence_settings().noise_floor_db, -40.0);
    }

    #[test]
    fn test_validation_errors() {
        let mut config: ServiceConfig = toml::from_str(MINIMAL).unwrap();
        config.database.sqlite_path = None;
        assert!(config.validate().unwrap_err().contains("sqlite_path"));

        let mut config: ServiceConfig = toml::from_str(MINIMAL).unwrap();
        config.combine.heartbeat_interval_secs = Some(600);
        assert!(config.validate().unwrap_err().contains("stale_after_secs"));

        let mut config: ServiceConfig = toml::from_str(MINIMAL).unwrap();
        config.combine.download_batch_size = Some(0);
        assert!(config.validate().unwrap_err().contains("download_batch_size"));

        let mut config: ServiceConfig = toml::from_str(MINIMAL).unwrap();
        config.recording.bits_per_sample = Some(24);
        assert!(config.validate().unwrap_err().contains("bits_per_sample"));

        let mut config: ServiceConfig = toml::from_str(MINIMAL).unwrap();
        config.recording.channels = Some(40_000);
        assert!(config.validate().unwrap_err().contains("channels must be 1 or 2"));

        let mut config: ServiceConfig = toml::from_str(MINIMAL).unwrap();
        config.recording.channels = Some(2);
        config.recording.sample_rate = Some(u32::MAX);
        assert!(config.validate().unwrap_err().contains("sample_rate"));

        let mut config: ServiceConfig = toml::from_str(MINIMAL).unwrap();
        config.recording.channels = Some(2);
        config.recording.sample_rate = Some(MAX_SAMPLE_RATE);
        assert!(config.validate().is_ok());

        let mut config: ServiceConfig = toml::from_str(MINIMAL).unwrap();
        config.storage.backend = StorageBackend::Http;
        assert!(config.validate().unwrap_err().contains("bucket"));
    }
}
