use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use serde::Deserialize;

use stream_api::StreamTransport;
use transport_kinesis::{KinesisConfig, KinesisTransport};
use transport_memory::{MemoryBroker, MemoryConfig};

use crate::config::Effective;
use crate::error::CliError;

/// Известные провайдеры. Набор закрыт: новый провайдер = новый вариант
/// плюс конструктор в [`TransportRegistry::with_defaults`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process broker
    Memory,
    /// AWS Kinesis (JSON API + SigV4)
    Kinesis,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Memory => f.write_str("memory"),
            ProviderKind::Kinesis => f.write_str("kinesis"),
        }
    }
}

type Constructor = Box<dyn Fn(&Effective) -> Result<Arc<dyn StreamTransport>, CliError> + Send + Sync>;

/// ProviderKind → конструктор транспорта.
pub struct TransportRegistry {
    constructors: HashMap<ProviderKind, Constructor>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self { constructors: HashMap::new() }
    }

    pub fn register<F>(&mut self, kind: ProviderKind, constructor: F)
    where
        F: Fn(&Effective) -> Result<Arc<dyn StreamTransport>, CliError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Box::new(constructor));
    }

    /// Все встроенные провайдеры. Memory-транспорты, собранные одним
    /// registry, делят общий broker.
    pub fn with_defaults(memory: MemoryConfig) -> Self {
        let mut registry = Self::new();

        let broker = MemoryBroker::new(memory);
        registry.register(ProviderKind::Memory, move |_| {
            let transport: Arc<dyn StreamTransport> = Arc::new(broker.connect());
            Ok(transport)
        });

        registry.register(ProviderKind::Kinesis, |eff| {
            let credentials = eff.credentials.clone().ok_or_else(|| {
                CliError::Config(
                    "kinesis requires AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY".into(),
                )
            })?;
            let mut config = KinesisConfig::new(eff.client.destination.region());
            config.endpoint = eff.endpoint.clone();
            if let Some(timeout_ms) = eff.timeout_ms {
                config.timeout_ms = timeout_ms;
            }
            let transport: Arc<dyn StreamTransport> =
                Arc::new(KinesisTransport::new(config, credentials)?);
            Ok(transport)
        });

        registry
    }

    pub fn build(&self, eff: &Effective) -> Result<Arc<dyn StreamTransport>, CliError> {
        let constructor = self.constructors.get(&eff.provider).ok_or_else(|| {
            CliError::Config(format!("provider '{}' is not registered", eff.provider))
        })?;
        let transport = constructor(eff)?;
        tracing::debug!(provider = %eff.provider, stream = %eff.client.destination.name(), "transport built");
        Ok(transport)
    }
}
