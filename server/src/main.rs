#![allow(dead_code)]
mod email;
mod error;
mod ledger;
mod notify;
mod observability;
mod prompt;
mod rate_limiters;
mod routes;
mod server_config;
mod state;
#[cfg(test)]
mod testing;
mod util;

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use email::MaildirSource;
use ledger::OutcomeLedger;
use mimalloc::MiMalloc;
use notify::TwilioNotifier;
use prompt::MistralClassifier;
use rate_limiters::RateLimiters;
use routes::{RouterState, StatusRouter};
use server_config::ServerConfig;
use state::{
    triage_pipeline::{run_flush_loop, PollOrchestrator, WorkerPool},
    AppContext,
};
use tokio::signal;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::load()?;
    tracing::info!("{}", config);

    if !config.settings.prompt_path.exists() {
        tracing::warn!(
            "Prompt template {} does not exist, every classification will fail",
            config.settings.prompt_path.display()
        );
    }

    let ledger = Arc::new(
        OutcomeLedger::load(&config.settings.state_path, config.retention.clone()).await,
    );

    let http_client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .context("Failed to build http client")?;
    let rate_limiters = RateLimiters::from_config(&config.classifier);
    let classifier =
        MistralClassifier::new(http_client.clone(), &config.classifier, rate_limiters)?;
    let notifier = TwilioNotifier::new(http_client, config.notifier.clone());
    let source = MaildirSource::new(config.source.maildir.clone());

    let poll_interval = config.settings.poll_interval();
    let flush_interval = config.settings.flush_interval();
    let port = config.server.port;

    let ctx = AppContext::new(
        config,
        ledger.clone(),
        Arc::new(source),
        Arc::new(classifier),
        Arc::new(notifier),
    );

    let shutdown = CancellationToken::new();
    let pool_handle = WorkerPool::spawn(ctx.clone(), shutdown.clone());
    let flush_handle = run_flush_loop(ledger, flush_interval, shutdown.clone());
    let orchestrator = PollOrchestrator::new(ctx.clone(), shutdown.clone());

    let mut scheduler = JobScheduler::new().await?;
    {
        let orchestrator_ = orchestrator.clone();
        scheduler
            .add(Job::new_one_shot_async(
                Duration::from_secs(1),
                move |_uuid, _l| {
                    let orchestrator = orchestrator_.clone();
                    Box::pin(async move {
                        tracing::info!("Running initial poll cycle...");
                        orchestrator.trigger().await;
                    })
                },
            )?)
            .await?;

        let orchestrator_ = orchestrator.clone();
        // Every `poll_interval`, list and drain new mail
        scheduler
            .add(Job::new_repeated_async(poll_interval, move |uuid, mut l| {
                let orchestrator = orchestrator_.clone();
                Box::pin(async move {
                    if orchestrator.trigger().await.is_none() {
                        tracing::info!("Poll job {} skipped, a cycle is still running", uuid);
                    }

                    let next_tick = l.next_tick_for_job(uuid).await;
                    if let Ok(Some(ts)) = next_tick {
                        tracing::debug!("Next poll cycle at {:?}", ts)
                    }
                })
            })?)
            .await?;
    }

    scheduler.set_shutdown_handler(Box::new(move || {
        Box::pin(async move {
            tracing::info!("Shutting down scheduler");
        })
    }));
    scheduler.start().await?;

    let router = StatusRouter::create(RouterState { ctx, orchestrator });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Triage server running on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    tracing::info!("Server stopped, finishing in-flight work...");
    shutdown.cancel();
    scheduler.shutdown().await?;
    pool_handle.await?;
    flush_handle.await?;
    tracing::info!("Cleanups done, shutting down");

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if env::var("LOG_FORMAT").is_ok_and(|v| v == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
            .init();
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = shutdown.cancelled() => {},
    }
}
