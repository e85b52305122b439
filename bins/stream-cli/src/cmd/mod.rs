pub mod publish;
pub mod smoke;
pub mod subscribe;

use stream_client::{Publisher, Subscriber, SubscriberConfig};

use crate::config::Effective;
use crate::error::CliError;
use crate::registry::TransportRegistry;

pub(crate) fn publisher(eff: &Effective, registry: &TransportRegistry) -> Result<Publisher, CliError> {
    let transport = registry.build(eff)?;
    Ok(Publisher::new(eff.client.destination.clone(), transport).with_retry_policy(eff.client.retry.policy()))
}

pub(crate) fn subscriber(
    eff: &Effective,
    registry: &TransportRegistry,
    config: SubscriberConfig,
) -> Result<Subscriber, CliError> {
    let transport = registry.build(eff)?;
    Ok(Subscriber::new(eff.client.destination.clone(), transport).with_config(config))
}
