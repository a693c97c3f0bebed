//! Environment configuration with typed capability sets.
//!
//! Feature toggles expand into fully-validated settings structs at load
//! time, so a feature that is enabled but missing a credential fails the
//! process before any cycle runs instead of at first use.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;

const DEFAULT_POLL_INTERVAL_MINUTES: u32 = 5;
const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_DB_PATH: &str = "murmur.db";
const DEFAULT_EXTRACTION_MODEL: &str = "x-ai/grok-4-fast";
const DEFAULT_EXECUTION_MODEL: &str = "claude-3-5-sonnet-20240620";
const DEFAULT_SUMMARY_MODEL: &str = "claude-3-5-haiku-20241022";
const DEFAULT_TRIGGER_EMOJI: &str = "memo";
const DEFAULT_OCR_RESULTS_PATH: &str = "ocr_results";
const DEFAULT_SERVER_PORT: u16 = 3000;
const DEFAULT_GITHUB_BRANCH: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionProvider {
    OpenRouter,
    OpenAi,
}

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub provider: ExtractionProvider,
    pub model: String,
    pub api_key: String,
    pub prompt_override: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub gateway_url: String,
    pub gateway_api_key: Option<String>,
    pub anthropic_api_key: String,
    pub model: String,
    pub prompt_override: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub bot_token: String,
    pub signing_secret: String,
    pub vision_api_key: String,
    pub anthropic_api_key: String,
    pub summary_model: String,
    pub trigger_emoji: String,
    pub results_path: String,
    pub server_port: u16,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub lifelog_api_key: String,
    pub slack_webhook_url: String,
    pub db_path: PathBuf,
    pub poll_interval_minutes: u32,
    pub timezone: String,
    pub extraction: ExtractionSettings,
    pub execution: Option<ExecutionSettings>,
    pub github: Option<GitHubSettings>,
    pub daily_archive_enabled: bool,
    pub ocr: Option<OcrSettings>,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .with_context(|| format!("{key} is required"))
        };
        let optional = |key: &str| -> Option<String> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let flag = |key: &str| -> bool { optional(key).as_deref() == Some("true") };

        let lifelog_api_key = required("LIFELOG_API_KEY")?;
        let slack_webhook_url = required("SLACK_WEBHOOK_URL")?;
        let db_path = PathBuf::from(
            optional("MURMUR_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
        );

        let poll_interval_minutes = match optional("POLL_INTERVAL_MINUTES") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("invalid POLL_INTERVAL_MINUTES '{raw}'"))?,
            None => DEFAULT_POLL_INTERVAL_MINUTES,
        };
        if poll_interval_minutes == 0 {
            bail!("POLL_INTERVAL_MINUTES must be greater than 0");
        }

        let timezone =
            optional("LIFELOG_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        if timezone.parse::<Tz>().is_err() {
            bail!("invalid LIFELOG_TIMEZONE '{timezone}'");
        }

        let provider = match optional("TASK_MODEL_PROVIDER").as_deref() {
            None | Some("openrouter") => ExtractionProvider::OpenRouter,
            Some("openai") => ExtractionProvider::OpenAi,
            Some(other) => bail!("unsupported TASK_MODEL_PROVIDER '{other}'"),
        };
        let extraction_api_key = match provider {
            ExtractionProvider::OpenRouter => required("OPENROUTER_API_KEY")
                .context("OPENROUTER_API_KEY is required for the openrouter provider")?,
            ExtractionProvider::OpenAi => required("OPENAI_API_KEY")
                .context("OPENAI_API_KEY is required for the openai provider")?,
        };
        let extraction = ExtractionSettings {
            provider,
            model: optional("TASK_MODEL_ID")
                .unwrap_or_else(|| DEFAULT_EXTRACTION_MODEL.to_string()),
            api_key: extraction_api_key,
            prompt_override: optional("TODO_EXTRACTION_PROMPT"),
        };

        let execution = if flag("ENABLE_TASK_EXECUTION") {
            Some(ExecutionSettings {
                gateway_url: required("GATEWAY_RPC_URL")
                    .context("GATEWAY_RPC_URL is required when ENABLE_TASK_EXECUTION is true")?,
                gateway_api_key: optional("GATEWAY_RPC_API_KEY"),
                anthropic_api_key: required("ANTHROPIC_API_KEY")
                    .context("ANTHROPIC_API_KEY is required when ENABLE_TASK_EXECUTION is true")?,
                model: optional("EXECUTION_MODEL_ID")
                    .unwrap_or_else(|| DEFAULT_EXECUTION_MODEL.to_string()),
                prompt_override: optional("TASK_EXECUTION_PROMPT"),
            })
        } else {
            None
        };

        let github = match (
            optional("GITHUB_TOKEN"),
            optional("GITHUB_OWNER"),
            optional("GITHUB_REPO"),
        ) {
            (Some(token), Some(owner), Some(repo)) => Some(GitHubSettings {
                token,
                owner,
                repo,
                branch: optional("GITHUB_BRANCH")
                    .unwrap_or_else(|| DEFAULT_GITHUB_BRANCH.to_string()),
            }),
            _ => None,
        };

        let daily_archive_enabled = flag("ENABLE_DAILY_ARCHIVE");
        if daily_archive_enabled && github.is_none() {
            bail!(
                "GITHUB_TOKEN, GITHUB_OWNER and GITHUB_REPO are required when \
                 ENABLE_DAILY_ARCHIVE is true"
            );
        }

        let ocr = if flag("ENABLE_SLACK_OCR") {
            let server_port = match optional("SERVER_PORT") {
                Some(raw) => raw
                    .parse::<u16>()
                    .with_context(|| format!("invalid SERVER_PORT '{raw}'"))?,
                None => DEFAULT_SERVER_PORT,
            };
            Some(OcrSettings {
                bot_token: required("SLACK_BOT_TOKEN")
                    .context("SLACK_BOT_TOKEN is required when ENABLE_SLACK_OCR is true")?,
                signing_secret: required("SLACK_SIGNING_SECRET")
                    .context("SLACK_SIGNING_SECRET is required when ENABLE_SLACK_OCR is true")?,
                vision_api_key: required("VISION_API_KEY")
                    .context("VISION_API_KEY is required when ENABLE_SLACK_OCR is true")?,
                anthropic_api_key: required("ANTHROPIC_API_KEY")
                    .context("ANTHROPIC_API_KEY is required when ENABLE_SLACK_OCR is true")?,
                summary_model: optional("SUMMARY_MODEL_ID")
                    .unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
                trigger_emoji: optional("OCR_TRIGGER_EMOJI")
                    .unwrap_or_else(|| DEFAULT_TRIGGER_EMOJI.to_string()),
                results_path: optional("OCR_RESULTS_PATH")
                    .unwrap_or_else(|| DEFAULT_OCR_RESULTS_PATH.to_string()),
                server_port,
            })
        } else {
            None
        };

        Ok(Self {
            lifelog_api_key,
            slack_webhook_url,
            db_path,
            poll_interval_minutes,
            timezone,
            extraction,
            execution,
            github,
            daily_archive_enabled,
            ocr,
        })
    }
}
