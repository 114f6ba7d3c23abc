use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{DeskDriverError, DeskDriverResult};
use crate::stepper::StepperConfig;
use crate::verify::VerifyConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub r#loop: LoopConfig,
    #[serde(default)]
    pub screenshot: ScreenshotConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Short provider id, also the env-var prefix for the key fallback.
    pub id: String,
    /// Full chat-completions endpoint URL.
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Optional API key stored in deskdriver.toml (falls back to env var
    /// DESKDRIVER_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ProviderConfig {
    pub fn resolve_api_key(&self) -> DeskDriverResult<String> {
        if let Some(key) = self.api_key.as_deref() {
            if !key.trim().is_empty() {
                return Ok(key.trim().to_string());
            }
        }
        let var = format!(
            "DESKDRIVER_{}_API_KEY",
            self.id.to_uppercase().replace('-', "_")
        );
        match std::env::var(&var) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(DeskDriverError::Config(format!(
                "no API key for provider '{}': set api_key in deskdriver.toml or export {var}",
                self.id
            ))),
        }
    }
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_steps: u32,
    /// Minimum spacing between iteration starts.
    pub min_interval_ms: u64,
    /// Same-step re-asks after a decode failure.
    pub decode_retries: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { max_steps: 50, min_interval_ms: 300, decode_retries: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    /// Frames wider than this are downscaled before transmission.
    pub width: u32,
    /// JPEG quality of the transmitted frame.
    pub quality: u8,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self { width: 1280, quality: 70 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InputConfig {
    /// Log and record actions without touching the real mouse or keyboard.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Stamp a click marker on saved step images.
    pub enabled: bool,
    pub radius: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { enabled: false, radius: 18 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Minimum match score for CLICK_TEXT when the action omits one.
    pub min_score: f64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { min_score: 0.70 }
    }
}

impl AppConfig {
    /// Sample configuration for `--write-config`.
    pub fn sample() -> Self {
        Self {
            provider: ProviderConfig {
                id: "zhipu".into(),
                api_base: "https://open.bigmodel.cn/api/paas/v4/chat/completions".into(),
                model: "glm-4.5v".into(),
                temperature: default_temperature(),
                max_output_tokens: default_max_output_tokens(),
                api_key: None,
            },
            r#loop: LoopConfig::default(),
            screenshot: ScreenshotConfig::default(),
            input: InputConfig::default(),
            overlay: OverlayConfig::default(),
            ocr: OcrConfig::default(),
            verify: VerifyConfig::default(),
        }
    }

    pub fn stepper_config(&self) -> StepperConfig {
        StepperConfig {
            max_steps: self.r#loop.max_steps,
            min_interval_ms: self.r#loop.min_interval_ms,
            decode_retries: self.r#loop.decode_retries,
            shot_width: self.screenshot.width,
            shot_quality: self.screenshot.quality,
            ocr_min_score: self.ocr.min_score,
        }
    }
}

fn resolve_config_path() -> DeskDriverResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("deskdriver.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("deskdriver.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(DeskDriverError::Config(
        "deskdriver.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config(explicit: Option<&std::path::Path>) -> DeskDriverResult<AppConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => resolve_config_path()?,
    };
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        provider = %config.provider.id,
        model = %config.provider.model,
        "config loaded"
    );
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &std::path::Path) -> DeskDriverResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let toml_src = r#"
            [provider]
            id = "zhipu"
            api_base = "https://open.bigmodel.cn/api/paas/v4/chat/completions"
            model = "glm-4.5v"
        "#;
        let cfg: AppConfig = toml::from_str(toml_src).unwrap();

        assert_eq!(cfg.r#loop.max_steps, 50);
        assert_eq!(cfg.r#loop.min_interval_ms, 300);
        assert_eq!(cfg.screenshot.width, 1280);
        assert_eq!(cfg.screenshot.quality, 70);
        assert!(!cfg.input.dry_run);
        assert!(!cfg.overlay.enabled);
        assert_eq!(cfg.ocr.min_score, 0.70);
        assert!(cfg.verify.enabled);
        assert_eq!(cfg.provider.temperature, 0.2);
        assert_eq!(cfg.provider.max_output_tokens, 800);
        assert!(cfg.provider.api_key.is_none());
    }

    #[test]
    fn test_sections_override_defaults() {
        let toml_src = r#"
            [provider]
            id = "local"
            api_base = "http://127.0.0.1:8000/v1/chat/completions"
            model = "qwen2.5-vl"
            temperature = 0.0

            [loop]
            max_steps = 5
            decode_retries = 0

            [input]
            dry_run = true

            [verify]
            enabled = false
            roi_edge = 96
        "#;
        let cfg: AppConfig = toml::from_str(toml_src).unwrap();

        assert_eq!(cfg.provider.temperature, 0.0);
        assert_eq!(cfg.r#loop.max_steps, 5);
        assert_eq!(cfg.r#loop.decode_retries, 0);
        assert_eq!(cfg.r#loop.min_interval_ms, 300);
        assert!(cfg.input.dry_run);
        assert!(!cfg.verify.enabled);
        assert_eq!(cfg.verify.roi_edge, 96);

        let stepper = cfg.stepper_config();
        assert_eq!(stepper.max_steps, 5);
        assert_eq!(stepper.decode_retries, 0);
        assert_eq!(stepper.shot_width, 1280);
    }

    #[test]
    fn test_sample_round_trips_through_toml() {
        let sample = AppConfig::sample();
        let rendered = toml::to_string_pretty(&sample).unwrap();
        let back: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(back.provider.id, "zhipu");
        assert_eq!(back.r#loop.max_steps, sample.r#loop.max_steps);
    }

    #[test]
    fn test_api_key_env_fallback() {
        let cfg = ProviderConfig {
            id: "keytest-a".into(),
            api_base: "http://example.invalid".into(),
            model: "m".into(),
            temperature: 0.2,
            max_output_tokens: 800,
            api_key: None,
        };
        std::env::set_var("DESKDRIVER_KEYTEST_A_API_KEY", "sekrit");
        assert_eq!(cfg.resolve_api_key().unwrap(), "sekrit");
        std::env::remove_var("DESKDRIVER_KEYTEST_A_API_KEY");
        assert!(cfg.resolve_api_key().is_err());

        let inline = ProviderConfig { api_key: Some("inline".into()), ..cfg };
        assert_eq!(inline.resolve_api_key().unwrap(), "inline");
    }
}
