use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod banner;
mod config;
mod gate;
mod handlers;
mod services;
mod settings;
#[cfg(test)]
mod test_support;
mod utils;

use banner::BannerInjector;
use config::PanelConfig;
use gate::{GateLoader, GateStatus};
use outage_core::{Caller, GateDecision};
use outage_db::repositories::{OutageRepository, SettingsRepository};
use outage_db::{MemoryOutageStore, MemorySettingsStore, OutageStore, SettingsStore};
use services::gate_compiler::{GateCompiler, GateUpdate};
use services::outage_service::OutageService;
use settings::SettingsService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PanelConfig>,
    pub outages: Arc<OutageService>,
    pub settings: Arc<SettingsService>,
    pub gate: Arc<GateLoader>,
    pub banner: Arc<BannerInjector>,
    pub http: reqwest::Client,
}

impl AppState {
    pub async fn build(
        config: PanelConfig,
        outage_store: Arc<dyn OutageStore>,
        settings_store: Arc<dyn SettingsStore>,
        http: reqwest::Client,
    ) -> Result<Self> {
        let settings = Arc::new(
            SettingsService::new(settings_store, config.allowed_ips_forced.clone()).await?,
        );
        let compiler = Arc::new(GateCompiler::new(&config, http.clone()));
        let outages = Arc::new(OutageService::new(
            outage_store.clone(),
            settings.clone(),
            compiler,
        ));
        let banner = Arc::new(BannerInjector::new(
            outage_store,
            settings.clone(),
            &config.admin_path,
        ));
        let gate = Arc::new(GateLoader::new(config.gate_path.clone()));

        Ok(Self {
            config: Arc::new(config),
            outages,
            settings,
            gate,
            banner,
            http,
        })
    }
}

#[derive(Parser)]
#[command(name = "outage-panel")]
#[command(about = "Scheduled outage gate and banner for a protected site", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gate, banner and operator API
    Serve,
    /// Re-evaluate outages and rewrite or remove the installed gate once
    Prepare,
    /// Evaluate the installed gate for a caller
    Check {
        /// Caller address
        #[arg(long)]
        ip: IpAddr,
        /// Access key supplied by the caller
        #[arg(long)]
        key: Option<String>,
        /// Unix time to evaluate at (defaults to now)
        #[arg(long)]
        at: Option<i64>,
    },
}

pub fn build_router(state: AppState) -> Router {
    let admin_api = Router::new()
        .route(
            "/outages",
            get(handlers::admin::list_outages).post(handlers::admin::create_outage),
        )
        .route(
            "/outages/{id}",
            get(handlers::admin::get_outage)
                .put(handlers::admin::update_outage)
                .delete(handlers::admin::delete_outage),
        )
        .route("/outages/{id}/finish", post(handlers::admin::finish_outage))
        .route("/outages/{id}/start", post(handlers::admin::start_outage))
        .route("/status", get(handlers::admin::get_status))
        .route(
            "/settings",
            get(handlers::admin::get_settings).put(handlers::admin::save_settings),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_operator));

    // Gate runs before the banner so blocked callers never see site markup.
    let site = Router::new()
        .fallback(handlers::proxy::site_handler)
        .layer(middleware::from_fn_with_state(state.clone(), banner::banner_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), gate::gate_middleware));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/admin/api", admin_api)
        .merge(site)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        println!("Note: no .env file loaded: {}", e);
    }

    let cli = Cli::parse();

    let file_appender = tracing_appender::rolling::never(".", "server.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "outage_panel=debug,outage_db=info,tower_http=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let config = PanelConfig::load()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config).await,
        Commands::Prepare => {
            let state = init_state(config).await?;
            match state.outages.prepare_next_outage(Utc::now()).await? {
                GateUpdate::Written(policy) => {
                    println!("Gate written for outage #{}", policy.outage_id)
                }
                GateUpdate::Removed => println!("Gate removed"),
                GateUpdate::Unchanged => println!("No gate installed"),
            }
            Ok(())
        }
        Commands::Check { ip, key, at } => run_check(&config, ip, key.as_deref(), at).await,
    }
}

async fn init_state(config: PanelConfig) -> Result<AppState> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("outage-panel/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let (outage_store, settings_store): (Arc<dyn OutageStore>, Arc<dyn SettingsStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = outage_db::init_db(url).await?;
                (
                    Arc::new(OutageRepository::new(pool.clone())),
                    Arc::new(SettingsRepository::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set: outages are kept in memory only");
                (
                    Arc::new(MemoryOutageStore::new()),
                    Arc::new(MemorySettingsStore::new()),
                )
            }
        };

    AppState::build(config, outage_store, settings_store, http).await
}

async fn run_server(config: PanelConfig) -> Result<()> {
    let listen_port = config.listen_port;
    let state = init_state(config).await?;

    // Pick up changes made while the panel was down.
    if let Err(e) = state.outages.prepare_next_outage(Utc::now()).await {
        tracing::error!("Initial gate preparation failed: {:#}", e);
    }

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], listen_port));
    tracing::info!("Outage panel listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn run_check(config: &PanelConfig, ip: IpAddr, key: Option<&str>, at: Option<i64>) -> Result<()> {
    let now = match at {
        Some(secs) => DateTime::from_timestamp(secs, 0).context("Invalid --at timestamp")?,
        None => Utc::now(),
    };

    let loader = GateLoader::new(config.gate_path.clone());
    let gate = match loader.current().await {
        GateStatus::Absent => {
            println!("No gate installed at {}", loader.path().display());
            return Ok(());
        }
        GateStatus::Invalid => {
            anyhow::bail!("Gate at {} cannot be used", loader.path().display())
        }
        GateStatus::Loaded(gate) => gate,
    };

    let caller = Caller {
        ip: Some(ip),
        access_key: key,
    };
    match gate.decide(now, &caller) {
        GateDecision::OutsideWindow => println!("outside window: pass"),
        GateDecision::Allowed(checks) => {
            println!("allowed");
            for line in checks.diagnostics(&caller) {
                println!("{}", line);
            }
        }
        GateDecision::Blocked(checks) => {
            println!("blocked");
            for line in checks.diagnostics(&caller) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}
