//! Consumes the modem's SMS event stream: inbound messages go through the
//! router, delivery reports through the outbox correlation.

use std::sync::Arc;

use anyhow::bail;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use rastro_domain::{InboundSmsRouter, SmsOutbox};

use crate::modem::SmsEvent;

pub async fn run_sms_worker(
    mut events: mpsc::Receiver<SmsEvent>,
    router: Arc<InboundSmsRouter>,
    outbox: Arc<SmsOutbox>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            event = events.recv() => match event {
                Some(SmsEvent::Inbound(sms)) => {
                    if let Err(e) = router.handle_inbound(sms).await {
                        error!(error = %e, "failed to handle inbound sms");
                    }
                }
                Some(SmsEvent::Delivery(report)) => {
                    outbox.handle_delivery_report(report).await;
                }
                None => bail!("sms event channel closed"),
            },
        }
    }
}
