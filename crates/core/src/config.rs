use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::stage::Stage;

/// Load `.env` if present; silently ignored when missing.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Top-level configuration shared by every binary in the fabric. Each process
/// loads the whole thing and reads only the sections it needs; unused
/// sections cost nothing and keep a single env-var/TOML surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub broker: BrokerSection,
    pub stage: StageSection,
    pub generator: GeneratorSection,
    pub artifact_store: ArtifactStoreSection,
    pub orchestrator: OrchestratorSection,
    pub gateway: GatewaySection,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            broker: BrokerSection::from_env(),
            stage: StageSection::from_env(),
            generator: GeneratorSection::from_env(),
            artifact_store: ArtifactStoreSection::from_env(),
            orchestrator: OrchestratorSection::from_env(),
            gateway: GatewaySection::from_env(),
        }
    }

    /// Parse a TOML document, falling back to defaults for any section or
    /// key the file omits, then apply environment overrides on top. Env
    /// always wins, matching the convention documented for every CLI.
    pub fn from_toml_str(raw: &str) -> Result<Self, PipelineError> {
        let file_cfg: PartialConfig =
            toml::from_str(raw).map_err(|e| PipelineError::Validation(e.to_string()))?;
        let mut cfg = Self::from_env();
        file_cfg.apply_onto(&mut cfg);
        Ok(cfg)
    }

    /// Structural checks run once at startup; failure should exit the
    /// process with code 2.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.stage.max_attempts == 0 {
            return Err(PipelineError::Validation(
                "stage.max_attempts must be >= 1".into(),
            ));
        }
        if self.stage.concurrency == 0 {
            return Err(PipelineError::Validation(
                "stage.concurrency must be >= 1".into(),
            ));
        }
        if self.generator.max_rpm == 0 {
            return Err(PipelineError::Validation(
                "generator.max_rpm must be >= 1".into(),
            ));
        }
        if self.gateway.max_archive_bytes == 0 {
            return Err(PipelineError::Validation(
                "gateway.max_archive_bytes must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        tracing::info!(
            broker_url = %self.broker.url,
            stage_concurrency = self.stage.concurrency,
            max_attempts = self.stage.max_attempts,
            generator_endpoint = %self.generator.endpoint,
            artifact_store_url = %self.artifact_store.url,
            "pipeline config loaded"
        );
    }
}

/// A partial view of [`PipelineConfig`] as parsed from TOML; every field is
/// optional so a file only needs to specify overrides.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    broker: Option<PartialBroker>,
    stage: Option<PartialStage>,
    generator: Option<PartialGenerator>,
    artifact_store: Option<PartialArtifactStore>,
    orchestrator: Option<PartialOrchestrator>,
    gateway: Option<PartialGateway>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialBroker {
    url: Option<String>,
    subscribe_topic: Option<String>,
    publish_topic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialStage {
    name: Option<String>,
    concurrency: Option<u32>,
    deadline_seconds: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialGenerator {
    endpoint: Option<String>,
    timeout_seconds: Option<u64>,
    max_rpm: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialArtifactStore {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialOrchestrator {
    stall_threshold_seconds: Option<u64>,
    stall_check_interval_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialGateway {
    dashboard_ws_buffer: Option<usize>,
    max_archive_bytes: Option<u64>,
}

impl PartialConfig {
    fn apply_onto(self, cfg: &mut PipelineConfig) {
        if let Some(b) = self.broker {
            if let Some(v) = b.url {
                cfg.broker.url = v;
            }
            if let Some(v) = b.subscribe_topic {
                cfg.broker.subscribe_topic = v;
            }
            if let Some(v) = b.publish_topic {
                cfg.broker.publish_topic = v;
            }
        }
        if let Some(s) = self.stage {
            if let Some(v) = s.name {
                cfg.stage.name = v;
            }
            if let Some(v) = s.concurrency {
                cfg.stage.concurrency = v;
            }
            if let Some(v) = s.deadline_seconds {
                cfg.stage.deadline_seconds = v;
            }
            if let Some(v) = s.max_attempts {
                cfg.stage.max_attempts = v;
            }
        }
        if let Some(g) = self.generator {
            if let Some(v) = g.endpoint {
                cfg.generator.endpoint = v;
            }
            if let Some(v) = g.timeout_seconds {
                cfg.generator.timeout_seconds = v;
            }
            if let Some(v) = g.max_rpm {
                cfg.generator.max_rpm = v;
            }
        }
        if let Some(a) = self.artifact_store {
            if let Some(v) = a.url {
                cfg.artifact_store.url = v;
            }
        }
        if let Some(o) = self.orchestrator {
            if let Some(v) = o.stall_threshold_seconds {
                cfg.orchestrator.stall_threshold_seconds = v;
            }
            if let Some(v) = o.stall_check_interval_seconds {
                cfg.orchestrator.stall_check_interval_seconds = v;
            }
        }
        if let Some(g) = self.gateway {
            if let Some(v) = g.dashboard_ws_buffer {
                cfg.gateway.dashboard_ws_buffer = v;
            }
            if let Some(v) = g.max_archive_bytes {
                cfg.gateway.max_archive_bytes = v;
            }
        }
    }
}

// ── Broker (C1) ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    pub url: String,
    pub subscribe_topic: String,
    pub publish_topic: String,
}

impl BrokerSection {
    fn from_env() -> Self {
        Self {
            url: env_or("BROKER_URL", "inproc://fabric"),
            subscribe_topic: env_or("SUBSCRIBE_TOPIC", ""),
            publish_topic: env_or("PUBLISH_TOPIC", ""),
        }
    }
}

// ── Stage worker runtime (C4) ─────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSection {
    pub name: String,
    pub concurrency: u32,
    pub deadline_seconds: u64,
    pub max_attempts: u32,
}

impl StageSection {
    fn from_env() -> Self {
        let name = env_or("STAGE", "analysis");
        let default_deadline = Stage::parse(&name)
            .map(|s| s.default_deadline().as_secs())
            .unwrap_or(600);
        Self {
            concurrency: env_u32(
                "STAGE_CONCURRENCY",
                if name == "test" { 1 } else { 4 },
            ),
            deadline_seconds: env_u64("STAGE_DEADLINE_SECONDS", default_deadline),
            max_attempts: env_u32("MAX_ATTEMPTS", 5),
            name,
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_seconds)
    }
}

// ── Generator client (C3) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSection {
    pub endpoint: String,
    pub timeout_seconds: u64,
    pub max_rpm: u32,
    pub api_key: Option<String>,
}

impl GeneratorSection {
    fn from_env() -> Self {
        Self {
            endpoint: env_or("GENERATOR_ENDPOINT", "https://api.anthropic.com/v1/messages"),
            timeout_seconds: env_u64("GENERATOR_TIMEOUT_SECONDS", 60),
            max_rpm: env_u32("GENERATOR_MAX_RPM", 60),
            api_key: env_opt("GENERATOR_API_KEY"),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// ── Artifact store (C2) ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactStoreSection {
    pub url: String,
}

impl ArtifactStoreSection {
    fn from_env() -> Self {
        Self {
            url: env_or("ARTIFACT_STORE_URL", "data/artifacts"),
        }
    }
}

// ── Orchestrator (C6) ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    pub stall_threshold_seconds: u64,
    pub stall_check_interval_seconds: u64,
}

impl OrchestratorSection {
    fn from_env() -> Self {
        Self {
            stall_threshold_seconds: env_u64("STALL_THRESHOLD_SECONDS", 600),
            stall_check_interval_seconds: env_u64("STALL_CHECK_INTERVAL_SECONDS", 30),
        }
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_seconds)
    }

    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_secs(self.stall_check_interval_seconds)
    }
}

// ── Gateway (C7/C8) ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    pub host: String,
    pub port: u16,
    pub dashboard_ws_buffer: usize,
    pub max_archive_bytes: u64,
    pub max_file_bytes: u64,
    pub max_files: u64,
}

impl GatewaySection {
    fn from_env() -> Self {
        Self {
            host: env_or("GATEWAY_HOST", "0.0.0.0"),
            port: env_u32("GATEWAY_PORT", 8080) as u16,
            dashboard_ws_buffer: env_u32("DASHBOARD_WS_BUFFER", 256) as usize,
            max_archive_bytes: env_u64("GATEWAY_MAX_ARCHIVE_BYTES", 50 * 1024 * 1024),
            max_file_bytes: env_u64("GATEWAY_MAX_FILE_BYTES", 5 * 1024 * 1024),
            max_files: env_u64("GATEWAY_MAX_FILES", 10_000),
        }
    }
}
