//! Queue consumer loop shared by both services.

use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use broker::{Broker, Delivery, SagaChannel, Topology};
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::Result;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Processed; the broker dropped the message.
    Acked,
    /// Returned to the queue for another attempt.
    Requeued,
    /// Rejected without requeue; the message went to the dead-letter queue.
    Rejected,
}

impl Handled {
    pub(crate) async fn settle(self, delivery: Delivery) -> Result<Self> {
        match self {
            Handled::Acked => delivery.ack().await?,
            Handled::Requeued => delivery.requeue().await?,
            Handled::Rejected => delivery.reject().await?,
        }
        Ok(self)
    }
}

/// Processes deliveries from one saga queue.
///
/// A handler settles every delivery it is given exactly once.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<Handled>;
}

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Consumes a saga queue until `shutdown` is set.
///
/// Declares the channel topology first; a declaration failure is returned.
/// Once consuming, stream errors and a closed stream trigger a reconnect
/// after an exponential backoff with jitter. Handler errors are logged and
/// the loop moves on to the next delivery.
#[tracing::instrument(skip_all, fields(queue = channel.queue))]
pub async fn run_consumer<B, H>(
    broker: &B,
    topology: &Topology,
    channel: &SagaChannel,
    handler: &H,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    B: Broker + ?Sized,
    H: DeliveryHandler + ?Sized,
{
    topology.ensure_channel(broker, channel).await?;

    let backoff_builder = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(MAX_BACKOFF)
        .with_jitter()
        .with_max_times(usize::MAX);
    let mut backoff = backoff_builder.build();
    let consumer_tag = format!("{}-consumer", channel.queue);

    while !*shutdown.borrow() {
        match broker.consume(channel.queue, &consumer_tag).await {
            Ok(mut deliveries) => {
                info!("Consumer connected, processing messages");
                backoff = backoff_builder.build();

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            info!("Consumer shutting down");
                            return Ok(());
                        }
                        next = deliveries.next() => match next {
                            Some(Ok(delivery)) => {
                                if let Err(e) = handler.handle(delivery).await {
                                    error!(error = %e, "Failed to handle delivery");
                                }
                            }
                            Some(Err(e)) => {
                                error!(error = %e, "Consumer delivery error, will reconnect");
                                break;
                            }
                            None => {
                                warn!("Consumer stream ended, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to start consumer, retrying after backoff");
            }
        }

        let delay = backoff.next().unwrap_or(MAX_BACKOFF);
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {
                // The connection may have been replaced; redeclare before consuming.
                if let Err(e) = topology.ensure_channel(broker, channel).await {
                    warn!(error = %e, "Failed to redeclare topology");
                }
            }
        }
    }

    info!("Consumer shutting down");
    Ok(())
}
