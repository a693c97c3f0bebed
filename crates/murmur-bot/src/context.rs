//! Application context: every collaborator constructed once at startup and
//! passed by reference into the cycle and the webhook handler. No global
//! mutable state.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use murmur_ai::{AnthropicClient, AnthropicConfig, LlmClient, OpenAiClient, OpenAiConfig};
use murmur_gateway::GatewayClient;
use murmur_github::GitHubClient;
use murmur_lifelog::{FetchOptions, Lifelog, LifelogClient};
use murmur_pipeline::{
    run_cycle, CycleDeps, CycleReport, ExecutionMode, LifelogSource, RecordSink, TaskExtraction,
    TaskNotifier, TaskRunner,
};
use murmur_slack::SlackNotifier;
use murmur_store::Store;
use murmur_tasks::{
    CandidateTask, ExecutionFailure, ExecutionReport, NotificationContext, TaskExecutor,
    TaskExtractor,
};

use crate::config::{BotConfig, ExtractionProvider};
use crate::daily_log::DailyLog;

const FETCH_LIMIT: u32 = 5;

/// Lifelog client behind the pipeline's source seam, carrying the
/// configured window parameters.
pub struct PollingSource {
    client: LifelogClient,
    timezone: String,
}

#[async_trait::async_trait]
impl LifelogSource for PollingSource {
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Lifelog>> {
        self.client
            .fetch(&FetchOptions {
                since,
                limit: FETCH_LIMIT,
                timezone: self.timezone.clone(),
            })
            .await
    }
}

pub struct ExtractionAdapter(pub TaskExtractor);

#[async_trait::async_trait]
impl TaskExtraction for ExtractionAdapter {
    async fn extract(&self, records: &[Lifelog]) -> Result<Vec<CandidateTask>> {
        self.0.extract(records).await
    }
}

pub struct NotifierAdapter(pub SlackNotifier);

#[async_trait::async_trait]
impl TaskNotifier for NotifierAdapter {
    async fn notify(&self, tasks: &[CandidateTask], context: &NotificationContext) -> Result<()> {
        self.0.notify(tasks, context).await
    }
}

pub struct RunnerAdapter(pub TaskExecutor);

#[async_trait::async_trait]
impl TaskRunner for RunnerAdapter {
    async fn execute(&self, task: &CandidateTask) -> Result<ExecutionReport, ExecutionFailure> {
        self.0.execute(task).await
    }
}

/// Daily-archive state: the GitHub client plus the in-memory buffer the
/// cycle feeds through the pipeline's record sink.
pub struct ArchiveRuntime {
    pub github: GitHubClient,
    pub daily_log: Mutex<DailyLog>,
}

impl RecordSink for ArchiveRuntime {
    fn buffer_records(&self, records: &[Lifelog]) {
        let Ok(mut log) = self.daily_log.lock() else {
            tracing::error!("daily log mutex poisoned, dropping records");
            return;
        };
        for record in records {
            log.add_record(record);
        }
        tracing::debug!(buffered = log.len(), "daily archive buffer updated");
    }
}

pub struct AppContext {
    pub config: BotConfig,
    pub store: Store,
    pub source: PollingSource,
    pub extraction: ExtractionAdapter,
    pub notifier: NotifierAdapter,
    pub runner: Option<RunnerAdapter>,
    pub archive: Option<ArchiveRuntime>,
}

impl AppContext {
    /// Build every collaborator from configuration. Fails fast: a broken
    /// credential or unreachable gateway stops the process before any
    /// cycle runs.
    pub async fn bootstrap(config: BotConfig) -> Result<Self> {
        let store = Store::open(&config.db_path).context("failed to open task store")?;

        let source = PollingSource {
            client: LifelogClient::new(config.lifelog_api_key.clone())?,
            timezone: config.timezone.clone(),
        };

        let extraction_llm: Arc<dyn LlmClient> = match config.extraction.provider {
            ExtractionProvider::OpenRouter => Arc::new(OpenAiClient::new(
                OpenAiConfig::openrouter(config.extraction.api_key.clone(), "murmur"),
            )?),
            ExtractionProvider::OpenAi => Arc::new(OpenAiClient::new(OpenAiConfig::openai(
                config.extraction.api_key.clone(),
            ))?),
        };
        let mut extractor = TaskExtractor::new(extraction_llm, config.extraction.model.clone());
        if let Some(prompt) = &config.extraction.prompt_override {
            extractor = extractor.with_system_prompt(prompt.clone());
        }
        let extraction = ExtractionAdapter(extractor);

        let notifier = NotifierAdapter(SlackNotifier::new(config.slack_webhook_url.clone())?);

        let runner = match &config.execution {
            Some(settings) => {
                tracing::info!("initializing task executor");
                let llm = Arc::new(AnthropicClient::new(AnthropicConfig::new(
                    settings.anthropic_api_key.clone(),
                ))?);
                let gateway = Arc::new(
                    GatewayClient::connect(
                        settings.gateway_url.clone(),
                        settings.gateway_api_key.clone(),
                    )
                    .await
                    .context("failed to connect to tool gateway")?,
                );
                let mut executor = TaskExecutor::new(llm, gateway, settings.model.clone());
                if let Some(prompt) = &settings.prompt_override {
                    executor = executor.with_system_prompt(prompt.clone());
                }
                Some(RunnerAdapter(executor))
            }
            None => None,
        };

        let archive = if config.daily_archive_enabled {
            let github_settings = config
                .github
                .as_ref()
                .ok_or_else(|| anyhow!("daily archive enabled without github settings"))?;
            tracing::info!("initializing daily archive");
            let timezone: Tz = config
                .timezone
                .parse()
                .map_err(|_| anyhow!("invalid timezone '{}'", config.timezone))?;
            Some(ArchiveRuntime {
                github: GitHubClient::new(
                    github_settings.token.clone(),
                    github_settings.owner.clone(),
                    github_settings.repo.clone(),
                )?,
                daily_log: Mutex::new(DailyLog::new(timezone)),
            })
        } else {
            None
        };

        Ok(Self {
            config,
            store,
            source,
            extraction,
            notifier,
            runner,
            archive,
        })
    }
}

/// One pass of the processing pipeline over the context's collaborators.
pub async fn run_one_cycle(ctx: &AppContext) -> Result<CycleReport> {
    let deps = CycleDeps {
        store: &ctx.store,
        source: &ctx.source,
        extraction: &ctx.extraction,
        notifier: &ctx.notifier,
        execution: match &ctx.runner {
            Some(runner) => ExecutionMode::Enabled { runner },
            None => ExecutionMode::Disabled,
        },
        archive: ctx
            .archive
            .as_ref()
            .map(|archive| archive as &dyn RecordSink),
    };
    run_cycle(&deps).await
}

/// Flush the daily-archive buffer to a GitHub issue. Failures leave the
/// buffer intact for the next attempt.
pub async fn archive_daily_logs(ctx: &AppContext) -> Result<()> {
    let Some(archive) = &ctx.archive else {
        tracing::debug!("daily archive is disabled");
        return Ok(());
    };

    let timezone: Tz = ctx
        .config
        .timezone
        .parse()
        .map_err(|_| anyhow!("invalid timezone '{}'", ctx.config.timezone))?;
    let today = Utc::now().with_timezone(&timezone).format("%Y-%m-%d");

    let (count, markdown) = {
        let log = archive
            .daily_log
            .lock()
            .map_err(|_| anyhow!("daily log mutex poisoned"))?;
        (log.len(), log.render_markdown(&today.to_string()))
    };
    if count == 0 {
        tracing::info!("no logs to archive today");
        return Ok(());
    }

    tracing::info!(count, %today, "archiving daily logs");
    let issue = archive
        .github
        .create_daily_archive_issue(&today.to_string(), &markdown)
        .await?;
    tracing::info!(issue, "created daily archive issue");

    archive
        .daily_log
        .lock()
        .map_err(|_| anyhow!("daily log mutex poisoned"))?
        .clear();
    Ok(())
}
