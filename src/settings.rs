use anyhow::Context;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

pub const DEFAULT_MODEL: &str = "gemini-pro";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;
pub const INTRO_PROMPT: &str = "My name is Vertex, an assistant powered by Google Gemini.";

/// Sampling parameters sent with every model request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            top_p: 0.59,
            top_k: 9,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

impl GenerationParams {
    fn merge(&mut self, other: GenerationParams) {
        if other.temperature.is_some() { self.temperature = other.temperature; }
        if other.top_p.is_some() { self.top_p = other.top_p; }
        if other.top_k.is_some() { self.top_k = other.top_k; }
        if other.max_output_tokens.is_some() { self.max_output_tokens = other.max_output_tokens; }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionSettings {
    pub model: Option<String>,
    pub generation: Option<GenerationParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionSettingsPatch {
    pub model: Option<String>,
    pub generation: Option<GenerationParams>,
}

impl SessionSettings {
    pub fn apply_patch(&mut self, patch: SessionSettingsPatch) {
        if let Some(model) = patch.model {
            self.model = Some(model);
        }
        if let Some(generation) = patch.generation {
            self.generation.get_or_insert_with(GenerationParams::default).merge(generation);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RequestOverrides {
    pub model: Option<String>,
    pub generation: Option<GenerationParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectiveSettings {
    pub model: String,
    pub generation: GenerationConfig,
}

/// Process-wide configuration. Defaults, then the optional JSON file, then the environment.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: String,
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub generation: GenerationConfig,
    pub intro_prompt: String,
    /// UI sessions untouched for this long are dropped.
    pub session_idle_secs: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("generation", &self.generation)
            .field("intro_prompt", &self.intro_prompt)
            .field("session_idle_secs", &self.session_idle_secs)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            api_base: DEFAULT_API_BASE.into(),
            api_key: None,
            generation: GenerationConfig::default(),
            intro_prompt: INTRO_PROMPT.into(),
            session_idle_secs: DEFAULT_SESSION_IDLE_SECS,
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.api_base_url()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(base) = lookup("GEMINI_BASE_URL") {
            self.api_base = base;
        }
        if let Some(model) = lookup("GEMINI_MODEL") {
            self.model = model;
        }
    }

    pub fn session_idle_ttl(&self) -> TimeDelta {
        i64::try_from(self.session_idle_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn api_base_url(&self) -> anyhow::Result<Url> {
        Url::parse(&self.api_base).with_context(|| format!("invalid api_base {:?}", self.api_base))
    }
}

pub fn resolve_effective_settings(
    global: &AppConfig,
    session: &SessionSettings,
    request: &RequestOverrides,
) -> EffectiveSettings {
    let model = request
        .model
        .clone()
        .or_else(|| session.model.clone())
        .unwrap_or_else(|| global.model.clone());

    let pick = |field: fn(&GenerationParams) -> Option<f32>| {
        request
            .generation
            .as_ref()
            .and_then(field)
            .or_else(|| session.generation.as_ref().and_then(field))
    };
    let pick_u32 = |field: fn(&GenerationParams) -> Option<u32>| {
        request
            .generation
            .as_ref()
            .and_then(field)
            .or_else(|| session.generation.as_ref().and_then(field))
    };

    let g = &global.generation;
    let generation = GenerationConfig {
        temperature: pick(|p| p.temperature).unwrap_or(g.temperature),
        top_p: pick(|p| p.top_p).unwrap_or(g.top_p),
        top_k: pick_u32(|p| p.top_k).unwrap_or(g.top_k),
        max_output_tokens: pick_u32(|p| p.max_output_tokens).unwrap_or(g.max_output_tokens),
    };

    EffectiveSettings { model, generation }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn precedence_request_over_session_over_global() {
        let global = AppConfig {
            model: "global-model".into(),
            generation: GenerationConfig { temperature: 0.1, top_p: 0.9, top_k: 40, max_output_tokens: 1000 },
            ..AppConfig::default()
        };

        let session = SessionSettings {
            model: Some("session-model".into()),
            generation: Some(GenerationParams {
                temperature: Some(0.2),
                top_k: Some(5),
                ..Default::default()
            }),
        };

        let request = RequestOverrides {
            model: Some("request-model".into()),
            generation: Some(GenerationParams {
                max_output_tokens: Some(2048),
                top_k: Some(3),
                ..Default::default()
            }),
        };

        let eff = resolve_effective_settings(&global, &session, &request);

        assert_eq!(eff.model, "request-model");
        assert_eq!(eff.generation.temperature, 0.2); // from session
        assert_eq!(eff.generation.max_output_tokens, 2048); // from request
        assert_eq!(eff.generation.top_k, 3); // request beats session
        assert_eq!(eff.generation.top_p, 0.9); // from global
    }

    #[test]
    fn defaults_match_the_flight_assistant() {
        let eff = resolve_effective_settings(
            &AppConfig::default(),
            &SessionSettings::default(),
            &RequestOverrides::default(),
        );
        assert_eq!(eff.model, "gemini-pro");
        assert_eq!(eff.generation, GenerationConfig { temperature: 0.4, top_p: 0.59, top_k: 9, max_output_tokens: 2048 });
    }

    #[test]
    fn patch_merges_generation_fields() {
        let mut s = SessionSettings {
            model: None,
            generation: Some(GenerationParams { temperature: Some(0.3), ..Default::default() }),
        };
        s.apply_patch(SessionSettingsPatch {
            model: Some("gemini-1.5-flash".into()),
            generation: Some(GenerationParams { top_k: Some(20), ..Default::default() }),
        });
        assert_eq!(s.model.as_deref(), Some("gemini-1.5-flash"));
        let g = s.generation.unwrap();
        assert_eq!(g.temperature, Some(0.3));
        assert_eq!(g.top_k, Some(20));
    }

    #[test]
    fn file_then_env_layering() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"model": "file-model", "generation": {{"temperature": 0.9}}}}"#).unwrap();
        let mut cfg = AppConfig::from_file(f.path()).unwrap();
        assert_eq!(cfg.model, "file-model");
        assert_eq!(cfg.generation.temperature, 0.9);
        assert_eq!(cfg.generation.top_k, 9);
        assert_eq!(cfg.api_base, DEFAULT_API_BASE);
        assert_eq!(cfg.session_idle_ttl(), TimeDelta::minutes(30));

        let env: HashMap<&str, &str> = [("GEMINI_MODEL", "env-model"), ("GEMINI_API_KEY", "secret")].into();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.model, "env-model");
        assert_eq!(cfg.api_key.as_deref(), Some("secret"));
        assert!(!format!("{:?}", cfg).contains("secret"));
    }

    #[test]
    fn rejects_invalid_base_url() {
        let cfg = AppConfig { api_base: "not a url".into(), ..AppConfig::default() };
        assert!(cfg.api_base_url().is_err());
    }
}
