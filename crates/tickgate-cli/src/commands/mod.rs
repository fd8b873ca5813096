mod run;
mod schedule;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tickgate_core::http_client::ReqwestHttpClient;
use tickgate_core::notifier::{LogSink, WebhookSink};
use tickgate_core::{Monitor, Notifier, Orchestrator, PipelineConfig, PipelineRunner, Storage, Warehouse, WarehouseConfig};
use tickgate_warehouse::resolve_tickgate_home;

use crate::cli::{Cli, Command, ScheduleCommand};
use crate::error::CliError;

/// What a command hands back to `main`.
pub struct CommandOutcome {
    pub data: Value,
    pub warnings: Vec<String>,
    pub exit_code: u8,
}

impl CommandOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            exit_code: 0,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_exit_code(mut self, exit_code: u8) -> Self {
        self.exit_code = exit_code;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutcome, CliError> {
    let context = Context::load(cli)?;
    match &cli.command {
        Command::Run(args) => run::run(&context, args).await,
        Command::Schedule(args) => match &args.command {
            ScheduleCommand::Start(start) => schedule::start(&context, start).await,
            ScheduleCommand::Stop => schedule::stop(&context),
            ScheduleCommand::Status => schedule::status(&context),
        },
        Command::Status(args) => status::run(&context, args),
    }
}

/// Resolved configuration shared by every command.
///
/// The warehouse is opened on demand: DuckDB allows one writer process, and
/// `schedule stop|status` must work while a scheduler holds it.
pub struct Context {
    pub config: PipelineConfig,
    pub home: PathBuf,
    pub mock: bool,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self, CliError> {
        let home = resolve_tickgate_home();
        let config = PipelineConfig::load_or_default(cli.config.as_deref(), &home)?;
        tracing::debug!(home = %home.display(), mock = cli.mock, "configuration loaded");
        Ok(Self {
            config,
            home,
            mock: cli.mock,
        })
    }

    pub fn open_warehouse(&self) -> Result<Arc<Warehouse>, CliError> {
        Ok(Arc::new(Warehouse::open(WarehouseConfig::in_home(self.home.clone()))?))
    }

    pub fn orchestrator(&self, storage: Arc<dyn Storage>) -> Result<Orchestrator, CliError> {
        let http_client = Arc::new(ReqwestHttpClient::new());
        Ok(Orchestrator::new(
            self.config.registry(http_client, self.mock),
            self.config.profiles(),
            self.config.validator(),
            storage,
        )
        .with_gate(self.config.gate()?)
        .with_config(self.config.orchestrator_config()))
    }

    pub fn notifier(&self) -> Notifier {
        let settings = &self.config.notifications;
        let mut notifier = Notifier::new(settings.retry);
        if settings.log {
            notifier = notifier.with_sink(Arc::new(LogSink));
        }
        if let Some(url) = &settings.webhook_url {
            notifier = notifier.with_sink(Arc::new(
                WebhookSink::new(url.clone(), Arc::new(ReqwestHttpClient::new()))
                    .with_bearer_token(settings.webhook_token.clone()),
            ));
        }
        notifier
    }

    pub fn runner(&self, storage: Arc<dyn Storage>) -> Result<PipelineRunner, CliError> {
        Ok(PipelineRunner::new(
            Arc::new(self.orchestrator(storage)?),
            self.config.instrument_ids(),
            self.config.provider_ids(),
            self.config.orchestrator.history_start,
        )
        .with_notifier(self.notifier()))
    }

    pub fn monitor(&self, storage: Arc<dyn Storage>) -> Monitor {
        Monitor::new(
            storage,
            self.config.instruments.clone(),
            self.config.provider_ids(),
        )
        .with_stale_after_days(self.config.monitor.stale_after_days)
    }
}
