mod config;
mod context;
mod daily_log;
mod events;
mod ocr;
mod runtime;
mod server;
mod summarizer;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use murmur_ai::{AnthropicClient, AnthropicConfig};
use murmur_github::GitHubClient;
use murmur_slack::{SlackApiClient, SlackNotifier};
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::BotConfig;
use crate::context::{run_one_cycle, AppContext};
use crate::events::ReactionHandler;
use crate::ocr::VisionOcrClient;
use crate::server::{router, ServerState};
use crate::summarizer::OcrSummarizer;

#[derive(Parser, Debug)]
#[command(
    name = "murmur-bot",
    about = "Polls a lifelog source, extracts to-do items, and relays them to Slack"
)]
struct Cli {
    /// Process a single cycle and exit.
    #[arg(long, env = "RUN_ONCE")]
    once: bool,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = BotConfig::from_env().context("configuration error")?;
    tracing::info!(
        execution = config.execution.is_some(),
        daily_archive = config.daily_archive_enabled,
        ocr = config.ocr.is_some(),
        interval_minutes = config.poll_interval_minutes,
        "configuration loaded"
    );

    let ctx = Arc::new(AppContext::bootstrap(config).await?);

    if cli.once {
        let report = run_one_cycle(&ctx).await?;
        tracing::info!(
            unique = report.unique,
            notified = report.notifications_sent,
            "one-shot cycle finished"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poll_handle = tokio::spawn(runtime::poll_loop(ctx.clone(), shutdown_rx.clone()));
    let archive_handle = ctx
        .archive
        .as_ref()
        .map(|_| tokio::spawn(runtime::archive_loop(ctx.clone(), shutdown_rx.clone())));
    let server_handle = match &ctx.config.ocr {
        Some(ocr_settings) => Some(tokio::spawn(serve_webhooks(
            ctx.clone(),
            ocr_settings.clone(),
            shutdown_rx.clone(),
        ))),
        None => None,
    };

    wait_for_termination().await;
    tracing::info!("termination signal received, shutting down");
    let _ = shutdown_tx.send(true);

    // Let an in-flight cycle finish; schedulers exit between ticks.
    let _ = poll_handle.await;
    if let Some(handle) = archive_handle {
        let _ = handle.await;
    }
    if let Some(handle) = server_handle {
        let _ = handle.await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                tracing::error!(error = %error, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn serve_webhooks(
    ctx: Arc<AppContext>,
    settings: config::OcrSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let handler = match build_reaction_handler(&ctx, &settings) {
        Ok(handler) => Arc::new(handler),
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "failed to build ocr handler");
            return;
        }
    };

    let state = Arc::new(ServerState {
        signing_secret: settings.signing_secret.clone(),
        handler,
    });
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server_port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(error = %error, %addr, "failed to bind webhook server");
            return;
        }
    };
    tracing::info!(%addr, "webhook server listening");

    let served = axum::serve(listener, app).with_graceful_shutdown(async move {
        // Either flank of the watch channel ends the server.
        let _ = shutdown.changed().await;
    });
    if let Err(error) = served.await {
        tracing::error!(error = %error, "webhook server failed");
    }
}

fn build_reaction_handler(
    ctx: &AppContext,
    settings: &config::OcrSettings,
) -> Result<ReactionHandler> {
    let api = SlackApiClient::new(settings.bot_token.clone())?;
    let ocr = VisionOcrClient::new(settings.vision_api_key.clone())?;
    let summarizer_llm = Arc::new(AnthropicClient::new(AnthropicConfig::new(
        settings.anthropic_api_key.clone(),
    ))?);
    let summarizer = OcrSummarizer::new(summarizer_llm, settings.summary_model.clone());
    let notifier = SlackNotifier::new(ctx.config.slack_webhook_url.clone())?;

    let (github, branch) = match &ctx.config.github {
        Some(github_settings) => (
            Some(GitHubClient::new(
                github_settings.token.clone(),
                github_settings.owner.clone(),
                github_settings.repo.clone(),
            )?),
            github_settings.branch.clone(),
        ),
        None => (None, "main".to_string()),
    };

    Ok(ReactionHandler::new(
        api,
        ocr,
        summarizer,
        github,
        notifier,
        settings.trigger_emoji.clone(),
        settings.results_path.clone(),
        branch,
    ))
}
