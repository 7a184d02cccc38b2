use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use lineblocs_common::{
    workload::{LINEBLOCS_API_TOKEN_ENV_VAR, LINEBLOCS_SECRET_ENV_VAR, LINEBLOCS_TOKEN_ENV_VAR},
    WorkloadSettings,
};
use lineblocs_kube::{ClientFactory, CredentialSource, RetryPolicy};
use secrecy::SecretString;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{router, state::CoreState};

pub const PROVISIONER_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG_FILE: &str = "/etc/lineblocs-provisioner.conf";

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct ProvisionerConfig {
    bind: Option<String>,
    http_port: Option<u16>,
    namespace: Option<String>,
    image: Option<String>,
    update_image: Option<String>,
    image_pull_secret: Option<String>,
    domain_suffix: Option<String>,
    container_port: Option<i32>,
    service_port: Option<i32>,
    restart_policy: Option<String>,
    lineblocs_token: Option<SecretString>,
    lineblocs_secret: Option<SecretString>,
    api_token: Option<SecretString>,
    kube_credentials: Option<CredentialSource>,
    kubeconfig: Option<PathBuf>,
    retry: Option<RetryConfig>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct RetryConfig {
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
}

#[derive(Parser)]
#[clap(name = "lineblocs-provisioner")]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// The config file path
    #[clap(short, long, action, value_hint = clap::ValueHint::AnyPath)]
    config_file: Option<PathBuf>,
    /// The folder for putting logs
    #[clap(short, long, action, value_hint = clap::ValueHint::AnyPath)]
    logs_folder: Option<PathBuf>,
    /// Log level for the provisioner's own crates
    #[clap(long, default_value = "info")]
    log_level: String,
    /// Token handed to every workload
    #[clap(long, env = LINEBLOCS_TOKEN_ENV_VAR, hide_env_values = true)]
    lineblocs_token: Option<String>,
    /// Secret handed to every workload
    #[clap(long, env = LINEBLOCS_SECRET_ENV_VAR, hide_env_values = true)]
    lineblocs_secret: Option<String>,
    /// Bearer token callers must present
    #[clap(long, env = LINEBLOCS_API_TOKEN_ENV_VAR, hide_env_values = true)]
    api_token: Option<String>,
}

impl RetryConfig {
    fn policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            initial_delay: self
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: self
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: defaults.jitter,
        }
    }
}

impl ProvisionerConfig {
    fn bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.bind.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
            self.http_port.unwrap_or(80)
        )
    }

    fn client_factory(&self) -> ClientFactory {
        ClientFactory::new(
            self.kube_credentials.unwrap_or_default(),
            self.kubeconfig.clone(),
        )
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.as_ref().map(RetryConfig::policy).unwrap_or_default()
    }

    /// Values from the command line or environment win over the file.
    fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(token) = &cli.lineblocs_token {
            self.lineblocs_token = Some(SecretString::from(token.clone()));
        }
        if let Some(secret) = &cli.lineblocs_secret {
            self.lineblocs_secret = Some(SecretString::from(secret.clone()));
        }
        if let Some(api_token) = &cli.api_token {
            self.api_token = Some(SecretString::from(api_token.clone()));
        }
    }

    fn into_state(self) -> Result<CoreState> {
        let connector = Arc::new(self.client_factory());
        let retry = self.retry_policy();
        let image = self
            .image
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| anyhow!("can't find workload image in your config file"))?;

        let mut settings = WorkloadSettings::new(image);
        settings.update_image = self.update_image.filter(|image| !image.trim().is_empty());
        if let Some(namespace) = self.namespace {
            settings.namespace = namespace;
        }
        if let Some(secret) = self.image_pull_secret {
            settings.image_pull_secret = secret;
        }
        if let Some(suffix) = self.domain_suffix {
            settings.domain_suffix = suffix;
        }
        if let Some(port) = self.container_port {
            settings.container_port = port;
        }
        if let Some(port) = self.service_port {
            settings.service_port = port;
        }
        if let Some(policy) = self.restart_policy {
            settings.restart_policy = policy;
        }
        if let Some(token) = self.lineblocs_token {
            settings.token = token;
        }
        if let Some(secret) = self.lineblocs_secret {
            settings.secret = secret;
        }

        Ok(CoreState::new(connector, settings, retry, self.api_token))
    }
}

pub async fn start() -> Result<()> {
    let cli = Cli::parse();

    let _guard = match setup_log(&cli).await {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("can't set up logging: {e:#}");
            None
        }
    };

    if let Err(e) = run(&cli).await {
        tracing::error!("lineblocs provisioner start server error: {e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let mut config = load_config(cli).await?;
    config.apply_overrides(cli);
    let bind = config.bind_addr();

    let state = config.into_state()?;
    if !state.requires_token() {
        tracing::warn!("no api-token configured, container endpoints accept any caller");
    }
    tracing::info!(
        namespace = %state.settings.namespace,
        image = %state.settings.image,
        "lineblocs provisioner {PROVISIONER_VERSION} starting"
    );
    let app = router::build_router(Arc::new(state));

    let tcp_listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind to {bind}"))?;
    tracing::info!("listening on {bind}");

    axum::serve(tcp_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| "http server stopped")?;

    tracing::info!("lineblocs provisioner shut down gracefully");
    Ok(())
}

async fn load_config(cli: &Cli) -> Result<ProvisionerConfig> {
    let (config_file, explicit) = match &cli.config_file {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let config_content = match tokio::fs::read_to_string(&config_file).await {
        Ok(content) => content,
        Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(
                "no config file at {}, using defaults",
                config_file.to_string_lossy()
            );
            return Ok(ProvisionerConfig::default());
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("can't read config file {}", config_file.to_string_lossy())
            })
        }
    };
    parse_config(&config_content)
}

fn parse_config(content: &str) -> Result<ProvisionerConfig> {
    toml::from_str(content).with_context(|| "wrong config file format")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install CTRL+C signal handler: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}

async fn setup_log(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let var = std::env::var("RUST_LOG").unwrap_or_default();
    let level = &cli.log_level;
    let var = format!(
        "warn,lineblocs_provisioner={level},lineblocs_api={level},lineblocs_kube={level},lineblocs_common={level},tower_http={level},{var}"
    );
    let filter = EnvFilter::builder().parse_lossy(var);

    let (file_layer, guard) = match &cli.logs_folder {
        Some(folder) => {
            tokio::fs::create_dir_all(folder).await?;
            let file_appender = tracing_appender::rolling::Builder::new()
                .max_log_files(30)
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix("lineblocs-provisioner.log")
                .build(folder)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(non_blocking)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}
