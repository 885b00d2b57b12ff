use std::sync::Arc;

use metrics::counter;
use readiness_bus::Subscription;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::poller::ProbeContext;
use crate::status::SessionStatus;

/// Turns backend readiness events into an immediate probe. The event is only
/// a hint: the service bind and the event are not ordered, so the probe
/// decides. A failed hint probe leaves the retry budget to the poller.
pub(crate) struct EventListener {
    handle: JoinHandle<()>,
}

impl EventListener {
    pub(crate) fn spawn(mut subscription: Subscription, ctx: Arc<ProbeContext>) -> Self {
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                debug!(target = "readiness.listener", event = %event.name, "backend event received");
                on_ready_hint(&ctx).await;
            }
            debug!(
                target = "readiness.listener",
                event = %subscription.name(),
                "backend event channel closed"
            );
        });
        Self { handle }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn on_ready_hint(ctx: &ProbeContext) {
    let mut reader = ctx.model.reader();
    // The hint can beat the provisioning call's own completion.
    let Some(snapshot) = reader.wait_for(|snapshot| !snapshot.provisioning).await else {
        return;
    };
    if snapshot.status != SessionStatus::Starting {
        debug!(
            target = "readiness.listener",
            status = %snapshot.status,
            "ignoring readiness hint outside of a starting attempt"
        );
        return;
    }

    let epoch = snapshot.epoch;
    if ctx.check_once().await {
        if ctx.model.mark_running(epoch) {
            counter!("readiness_transitions_total", 1, "to" => "running", "via" => "event");
            info!(target = "readiness.listener", %epoch, "display service ready after backend event");
        }
    } else {
        debug!(
            target = "readiness.listener",
            %epoch,
            "readiness hint not confirmed; poller keeps its schedule"
        );
    }
}
