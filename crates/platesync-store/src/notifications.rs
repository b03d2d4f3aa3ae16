//! Notifications of the active car, newest first, with the unread counter.

use std::collections::HashSet;

use platesync_shared::models::Notification;
use platesync_shared::types::NotificationId;

#[derive(Debug, Default, Clone)]
pub struct NotificationStore {
    items: Vec<Notification>,
    unread: u32,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full reload. `unread` is the server-reported counter; when the
    /// server omits it the loaded items are counted instead.
    pub fn replace(&mut self, mut items: Vec<Notification>, unread: Option<u32>) {
        let mut seen = HashSet::new();
        items.retain(|n| seen.insert(n.id));
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        self.unread = unread.unwrap_or_else(|| items.iter().filter(|n| !n.is_read).count() as u32);
        self.items = items;
    }

    /// Insert or overwrite. Returns `true` if the notification was new.
    pub fn upsert(&mut self, notification: Notification) -> bool {
        if let Some(existing) = self.items.iter_mut().find(|n| n.id == notification.id) {
            match (existing.is_read, notification.is_read) {
                (true, false) => self.unread += 1,
                (false, true) => self.unread = self.unread.saturating_sub(1),
                _ => {}
            }
            *existing = notification;
            return false;
        }

        if !notification.is_read {
            self.unread += 1;
        }
        let key = (notification.created_at, notification.id);
        let pos = self
            .items
            .iter()
            .position(|n| (n.created_at, n.id) < key)
            .unwrap_or(self.items.len());
        self.items.insert(pos, notification);
        true
    }

    /// Set the read flag of one notification, keeping the counter in step.
    /// Returns the previous flag, or `None` if the id is unknown.
    pub fn set_read(&mut self, id: NotificationId, read: bool) -> Option<bool> {
        let item = self.items.iter_mut().find(|n| n.id == id)?;
        let was = item.is_read;
        if was != read {
            item.is_read = read;
            if read {
                self.unread = self.unread.saturating_sub(1);
            } else {
                self.unread += 1;
            }
        }
        Some(was)
    }

    /// Mark everything read. Returns the ids that were unread, for rollback.
    pub fn mark_all_read(&mut self) -> Vec<NotificationId> {
        let mut changed = Vec::new();
        for item in self.items.iter_mut().filter(|n| !n.is_read) {
            item.is_read = true;
            changed.push(item.id);
        }
        self.unread = 0;
        changed
    }

    /// Restore the unread state captured before [`Self::mark_all_read`].
    pub fn restore_unread(&mut self, ids: &[NotificationId], unread: u32) {
        for item in self.items.iter_mut().filter(|n| ids.contains(&n.id)) {
            item.is_read = false;
        }
        self.unread = unread;
    }

    pub fn remove(&mut self, id: NotificationId) -> Option<Notification> {
        let idx = self.items.iter().position(|n| n.id == id)?;
        let removed = self.items.remove(idx);
        if !removed.is_read {
            self.unread = self.unread.saturating_sub(1);
        }
        Some(removed)
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn list(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread_count(&self) -> u32 {
        self.unread
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.unread = 0;
    }
}
