use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use stream_api::StreamDestination;
use stream_client::{ClientConfig, ProducerSettings, RetrySettings, SubscriberSettings};
use transport_kinesis::Credentials;
use transport_memory::MemoryConfig;

use crate::error::CliError;
use crate::registry::ProviderKind;

#[derive(Parser)]
#[command(name = "stream-cli", about = "Публикация и чтение записей sharded stream'а")]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Опубликовать записи (--data или JSON lines из stdin)
    Publish(PublishArgs),
    /// Читать stream и печатать записи до Ctrl+C
    Subscribe(SubscribeArgs),
    /// End-to-end проверка: subscriber + direct/retry/batch публикация
    Smoke(SmokeArgs),
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct CommonArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, global = true, default_value = "stream.toml", env = "STREAM_CLI_CONFIG")]
    pub config: String,

    /// Провайдер stream'а
    #[arg(long, global = true, value_enum, env = "STREAM_PROVIDER")]
    pub provider: Option<ProviderKind>,

    /// Имя stream'а (перекрывает [destination].name)
    #[arg(long, global = true, env = "STREAM_NAME")]
    pub stream: Option<String>,

    /// Регион (перекрывает [destination].region)
    #[arg(long, global = true, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Endpoint провайдера, напр. локальный эмулятор
    #[arg(long, global = true, env = "STREAM_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, global = true, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key_id: Option<String>,

    #[arg(long, global = true, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: Option<String>,

    #[arg(long, global = true, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub aws_session_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PublishMode {
    /// Одна попытка на запись
    #[default]
    One,
    /// Retry с exponential backoff
    Retry,
    /// Batch через BatchProducer
    Batch,
}

#[derive(Args, Clone, Debug)]
pub struct PublishArgs {
    #[arg(long, value_enum, default_value_t = PublishMode::One)]
    pub mode: PublishMode,

    /// Partition key. Без него: ключ от текущего времени
    #[arg(long)]
    pub key: Option<String>,

    /// JSON payload. Без него: JSON lines из stdin
    #[arg(long)]
    pub data: Option<String>,

    /// Записей в batch'е (перекрывает [producer].max_batch_records)
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(Args, Clone, Debug)]
pub struct SubscribeArgs {
    /// Только записи с этим partition key
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct SmokeArgs {
    /// Пауза после старта subscriber'а, мс
    #[arg(long, default_value_t = 2000)]
    pub warmup_ms: u64,

    /// Ожидание доставки после публикации, мс
    #[arg(long, default_value_t = 10_000)]
    pub settle_ms: u64,

    /// Partition key batch-записей
    #[arg(long, default_value = "source1")]
    pub key: String,
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub destination: DestinationSection,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub subscriber: SubscriberSettings,
    #[serde(default)]
    pub producer: ProducerSettings,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct DestinationSection {
    pub name: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransportSection {
    pub provider: Option<ProviderKind>,
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
}

pub fn load_config(path: &str) -> Result<FileConfig, CliError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| CliError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| CliError::Config(format!("bad config {path}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Region used by the memory provider when none is configured.
const LOCAL_REGION: &str = "local";

/// Итоговая конфигурация после мержа: config.toml < env/CLI
#[derive(Debug)]
pub struct Effective {
    pub provider: ProviderKind,
    pub client: ClientConfig,
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
    pub memory: MemoryConfig,
    pub credentials: Option<Credentials>,
}

impl Effective {
    pub fn new(args: &CommonArgs) -> Result<Self, CliError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                FileConfig::default()
            }
        };
        Self::merge(args, cfg)
    }

    pub fn merge(args: &CommonArgs, cfg: FileConfig) -> Result<Self, CliError> {
        let provider = args.provider.or(cfg.transport.provider).unwrap_or(ProviderKind::Memory);

        let name = args
            .stream
            .clone()
            .or(cfg.destination.name)
            .ok_or_else(|| CliError::Config("stream name is required (--stream or [destination].name)".into()))?;
        let region = match args.region.clone().or(cfg.destination.region) {
            Some(region) => region,
            None if provider == ProviderKind::Memory => LOCAL_REGION.to_string(),
            None => {
                return Err(CliError::Config("region is required (--region or [destination].region)".into()));
            }
        };

        let client = ClientConfig {
            destination: StreamDestination::new(name, region).map_err(|e| CliError::Config(e.to_string()))?,
            retry: cfg.retry,
            subscriber: cfg.subscriber,
            producer: cfg.producer,
        };
        client.validate()?;

        let credentials = match (&args.aws_access_key_id, &args.aws_secret_access_key) {
            (Some(id), Some(secret)) => Some(Credentials {
                access_key_id: id.clone(),
                secret_access_key: secret.clone(),
                session_token: args.aws_session_token.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            provider,
            client,
            endpoint: args.endpoint.clone().or(cfg.transport.endpoint),
            timeout_ms: cfg.transport.timeout_ms,
            memory: cfg.memory,
            credentials,
        })
    }
}
