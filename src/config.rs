use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"))
});

pub static DATA_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_DATA_PREFIX").unwrap_or("/usr/local/var/facegate"))
});

pub static MODEL_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_MODEL_PREFIX").unwrap_or("/usr/local/share/facegate/models"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub model_dir: PathBuf,
    pub database: PathBuf,
    pub verify: VerifyConfig,
    pub notify: NotifyConfig,
    pub enroll: EnrollConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            model_dir: MODEL_PREFIX.to_path_buf(),
            database: DATA_PREFIX.join("credentials.db"),
            verify: VerifyConfig::default(),
            notify: NotifyConfig::default(),
            enroll: EnrollConfig::default(),
        }
    }
}

/// Capture loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Capture every Nth frame.
    pub cadence_frames: u32,
    /// Upper bound on frames read before giving up.
    pub max_iterations: u32,
    pub match_threshold: f32,
    pub min_face_ratio: f32,
    /// Consecutive failed reads after which the camera counts as gone.
    pub max_read_failures: u32,
    /// Where transient capture artifacts are written.
    pub work_dir: PathBuf,
    /// Image whose embedding stands in when a capture has no face.
    pub fallback_image: Option<PathBuf>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            cadence_frames: 120,
            max_iterations: 10_000,
            match_threshold: crate::matcher::DEFAULT_THRESHOLD,
            min_face_ratio: crate::matcher::DEFAULT_MIN_FACE_RATIO,
            max_read_failures: 30,
            work_dir: PathBuf::from("."),
            fallback_image: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub address: SocketAddr,
    pub timeout_ms: u64,
    pub message: String,
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            address: crate::notify::DEFAULT_ADDRESS,
            timeout_ms: crate::notify::DEFAULT_TIMEOUT.as_millis() as u64,
            message: "Face recognized!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollConfig {
    /// Delay between opening the camera and taking the enrollment frame.
    pub settle_ms: u64,
    pub min_password_len: usize,
    /// Detector confidence the quality gate requires.
    pub min_detection_score: f32,
}

impl EnrollConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for EnrollConfig {
    fn default() -> Self {
        Self {
            settle_ms: 1000,
            min_password_len: 8,
            min_detection_score: 0.8,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let v = &self.verify;
        if v.cadence_frames == 0 {
            anyhow::bail!("verify.cadence_frames must be greater than zero");
        }
        if v.max_iterations == 0 {
            anyhow::bail!("verify.max_iterations must be greater than zero");
        }
        if v.max_read_failures == 0 {
            anyhow::bail!("verify.max_read_failures must be greater than zero");
        }
        if !(0.0..=1.0).contains(&v.match_threshold) {
            anyhow::bail!(
                "verify.match_threshold must be within [0, 1], got {}",
                v.match_threshold
            );
        }
        if !(0.0..=1.0).contains(&v.min_face_ratio) {
            anyhow::bail!(
                "verify.min_face_ratio must be within [0, 1], got {}",
                v.min_face_ratio
            );
        }
        if self.enroll.min_password_len < crate::enroll::MIN_PASSWORD_LEN {
            anyhow::bail!(
                "enroll.min_password_len must be at least {}, got {}",
                crate::enroll::MIN_PASSWORD_LEN,
                self.enroll.min_password_len
            );
        }
        if !(0.0..=1.0).contains(&self.enroll.min_detection_score) {
            anyhow::bail!(
                "enroll.min_detection_score must be within [0, 1], got {}",
                self.enroll.min_detection_score
            );
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(Some(&tmp.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.verify.cadence_frames, 120);
        assert_eq!(cfg.verify.max_iterations, 10_000);
        assert_eq!(cfg.notify.address, crate::notify::DEFAULT_ADDRESS);
        assert_eq!(cfg.notify.address.port(), 12345);
        assert_eq!(cfg.notify.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn partial_file_overrides_selected_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "camera = \"/dev/video2\"\n[verify]\nmatch_threshold = 0.3\n",
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.camera, "/dev/video2");
        assert!((cfg.verify.match_threshold - 0.3).abs() < 1e-6);
        assert_eq!(cfg.verify.cadence_frames, 120);
    }

    #[test]
    fn rejects_zero_cadence() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[verify]\ncadence_frames = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let mut cfg = Config::default();
        cfg.verify.match_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_weak_password_floor() {
        let mut cfg = Config::default();
        cfg.enroll.min_password_len = 1;
        assert!(cfg.validate().is_err());

        cfg.enroll.min_password_len = 12;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("etc").join("config.toml");
        let mut cfg = Config::default();
        cfg.verify.max_iterations = 50;
        save_config(&cfg, Some(&path)).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.verify.max_iterations, 50);
    }
}
