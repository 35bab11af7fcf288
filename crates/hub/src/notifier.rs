//! Turns raised low-stock alerts into persisted notifications and pushes
//! them to connected clients.

use domain::RaisedAlert;
use ledger::{NewNotification, NotificationStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{HubHandle, WireEvent};

/// Formats the text of a low-stock notification.
pub fn low_stock_message(product_name: &str, quantity: i64) -> String {
    format!("Product '{product_name}' stock is low ({quantity} remaining)")
}

/// Persists each alert as a notification for the acting user, then
/// broadcasts it.
///
/// A notification that cannot be stored is logged and not broadcast. The
/// stock change that raised it is already committed and is unaffected.
pub struct NotificationDispatcher<N: NotificationStore> {
    store: N,
    hub: HubHandle,
}

impl<N: NotificationStore + 'static> NotificationDispatcher<N> {
    pub fn new(store: N, hub: HubHandle) -> Self {
        Self { store, hub }
    }

    /// Consumes alerts until every sender is gone.
    pub fn spawn(self, mut alerts: mpsc::UnboundedReceiver<RaisedAlert>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(raised) = alerts.recv().await {
                self.dispatch(raised).await;
            }
            tracing::debug!("notification dispatcher stopped");
        })
    }

    #[tracing::instrument(
        skip(self, raised),
        fields(product_id = %raised.alert.product_id, severity = %raised.alert.severity)
    )]
    pub async fn dispatch(&self, raised: RaisedAlert) {
        let message = low_stock_message(&raised.product_name, raised.alert.quantity);
        let notification = match self
            .store
            .create_notification(NewNotification::low_stock(raised.actor_id, message))
            .await
        {
            Ok(notification) => {
                metrics::counter!("notifications_persisted_total").increment(1);
                notification
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to store low stock notification");
                return;
            }
        };

        if let Err(err) = self.hub.broadcast(&WireEvent::notification(&notification)) {
            tracing::warn!(error = %err, "low stock notification not broadcast");
        }
    }
}
