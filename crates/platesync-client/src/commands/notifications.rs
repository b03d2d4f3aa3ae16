use platesync_shared::models::Notification;
use platesync_shared::normalize::{normalize_list, normalize_notification, Record};
use platesync_shared::types::NotificationId;

use crate::api;
use crate::client::{report_skipped, SyncClient};
use crate::error::SyncError;
use crate::events::StateChange;
use crate::optimistic::{MarkAllNotificationsRead, MarkNotificationRead};

const NOTIFICATION_LIST_KEYS: &[&str] = &["notifications", "data", "items", "results"];
const UNREAD_KEYS: &[&str] = &["unread_count", "unreadCount", "unread"];

impl SyncClient {
    /// Reload the active car's notifications and unread counter.
    pub async fn load_notifications(&self) -> Result<Vec<Notification>, SyncError> {
        let (token, car) = self.acting()?;
        let body = self
            .call(api::list_notifications(car).with_token(token.clone()))
            .await?;

        let (mut items, skipped) =
            normalize_list(&body, NOTIFICATION_LIST_KEYS, normalize_notification);
        report_skipped("notification", &skipped);
        items.retain(|n| n.recipient_car_id == car);
        let unread = Record::new(&body).ok().and_then(|r| r.count(UNREAD_KEYS));

        let items = self.with_state_as(&token, car, |state| {
            state.stores.notifications.replace(items, unread);
            state.stores.notifications.list().to_vec()
        })?;
        self.emit(StateChange::Notifications);
        Ok(items)
    }

    /// Newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.read(|stores| stores.notifications.list().to_vec())
    }

    pub fn unread_notifications(&self) -> u32 {
        self.read(|stores| stores.notifications.unread_count())
    }

    pub async fn mark_notification_read(&self, id: NotificationId) -> Result<(), SyncError> {
        self.token()?;
        self.run_optimistic(MarkNotificationRead { id }).await
    }

    pub async fn mark_all_notifications_read(&self) -> Result<(), SyncError> {
        let (_, car) = self.acting()?;
        self.run_optimistic(MarkAllNotificationsRead { car }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use platesync_net::Method;
    use platesync_shared::types::CarId;
    use platesync_shared::TransportError;
    use serde_json::json;

    fn script_list(h: &Harness) {
        h.http.on(
            Method::Get,
            "/notifications?car_id=10",
            200,
            json!({
                "notifications": [
                    {"id": 1, "type": "like", "actor_car_id": 20, "recipient_car_id": 10, "post_id": 7,
                     "created_at": "2024-05-01T10:00:00Z"},
                    {"id": 2, "type": "follow", "actor_car_id": 21, "recipient_car_id": 10,
                     "created_at": "2024-05-02T10:00:00Z"},
                    {"id": 3, "type": "follow", "actor_car_id": 21, "recipient_car_id": 99}
                ],
                "unread_count": 5
            }),
        );
    }

    #[tokio::test]
    async fn test_load_keeps_server_counter_and_own_items() {
        let h = harness();
        h.sign_in(CarId(10));
        script_list(&h);

        let items = h.client.load_notifications().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, NotificationId(2));
        assert_eq!(h.client.unread_notifications(), 5);
    }

    #[tokio::test]
    async fn test_mark_read_rolls_back_on_failure() {
        let h = harness();
        h.sign_in(CarId(10));
        script_list(&h);
        h.client.load_notifications().await.unwrap();

        h.http.fail(Method::Put, "/notifications/1/read", TransportError::Timeout);
        h.http.on(Method::Put, "/notifications/1/read", 200, json!({"ok": true}));

        assert!(h.client.mark_notification_read(NotificationId(1)).await.is_err());
        assert_eq!(h.client.unread_notifications(), 5);
        assert!(h.client.notifications().iter().all(|n| !n.is_read));

        h.client.mark_notification_read(NotificationId(1)).await.unwrap();
        assert_eq!(h.client.unread_notifications(), 4);
    }

    #[tokio::test]
    async fn test_mark_all_read_and_rollback() {
        let h = harness();
        h.sign_in(CarId(10));
        script_list(&h);
        h.client.load_notifications().await.unwrap();

        h.http.on(Method::Put, "/notifications/read-all?car_id=10", 500, json!({}));
        h.http.on(Method::Put, "/notifications/read-all?car_id=10", 200, json!({}));

        assert!(h.client.mark_all_notifications_read().await.is_err());
        assert_eq!(h.client.unread_notifications(), 5);

        h.client.mark_all_notifications_read().await.unwrap();
        assert_eq!(h.client.unread_notifications(), 0);
        assert!(h.client.notifications().iter().all(|n| n.is_read));
    }
}
