//! Live alert set and bounded history

use super::types::Alert;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// Authoritative in-memory alert state
///
/// `live` holds alerts that are neither acknowledged nor expired.
/// `history` keeps every arrival, newest at the front, and drops the oldest
/// entry once `capacity` is exceeded.
pub struct AlertStore {
    live: HashMap<String, Alert>,
    history: VecDeque<Alert>,
    capacity: usize,
}

impl AlertStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            live: HashMap::new(),
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert an arrival. Returns true when an alert with the same identity
    /// was already live and got replaced.
    pub fn insert(&mut self, alert: Alert) -> bool {
        self.history.push_front(alert.clone());
        while self.history.len() > self.capacity {
            self.history.pop_back();
        }
        self.live.insert(alert.id.clone(), alert).is_some()
    }

    /// Remove from the live set and mark history entries as acknowledged.
    ///
    /// Returns the alert that was live, if any. Unknown identities leave the
    /// store untouched.
    pub fn acknowledge(
        &mut self,
        alert_id: &str,
        acknowledged_by: Option<&str>,
        at: DateTime<Utc>,
    ) -> Option<Alert> {
        for entry in self.history.iter_mut().filter(|a| a.id == alert_id) {
            entry.mark_acknowledged(acknowledged_by, at);
        }

        self.live.remove(alert_id).map(|mut alert| {
            alert.mark_acknowledged(acknowledged_by, at);
            alert
        })
    }

    /// Remove from the live set without acknowledging (cooldown expiry)
    pub fn remove_live(&mut self, alert_id: &str) -> Option<Alert> {
        self.live.remove(alert_id)
    }

    /// Drop every live alert for a device; history is kept
    pub fn purge_device(&mut self, device_id: &str) -> Vec<Alert> {
        let ids: Vec<String> = self
            .live
            .values()
            .filter(|a| a.device_id == device_id)
            .map(|a| a.id.clone())
            .collect();

        ids.iter().filter_map(|id| self.live.remove(id)).collect()
    }

    /// Empty the live set; history is kept
    pub fn clear_live(&mut self) -> Vec<Alert> {
        self.live.drain().map(|(_, alert)| alert).collect()
    }

    pub fn live(&self, alert_id: &str) -> Option<&Alert> {
        self.live.get(alert_id)
    }

    pub fn live_map(&self) -> HashMap<String, Alert> {
        self.live.clone()
    }

    /// Live alerts, newest first
    pub fn live_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.live.values().cloned().collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Full history, newest first
    pub fn history(&self) -> Vec<Alert> {
        self.history.iter().cloned().collect()
    }

    pub fn history_latest(&self, count: usize) -> Vec<Alert> {
        self.history.iter().take(count).cloned().collect()
    }

    pub fn history_by_device(&self, device_id: &str, count: usize) -> Vec<Alert> {
        self.history
            .iter()
            .filter(|a| a.device_id == device_id)
            .take(count)
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion_alert::types::RawAlertEvent;

    fn alert(id: &str, device_id: &str) -> Alert {
        Alert::from_event(RawAlertEvent {
            alert_id: id.to_string(),
            device_id: device_id.to_string(),
            device_name: None,
            timestamp: None,
            kind: None,
            confidence: None,
            alert_level: None,
            summary: None,
            objects: None,
            recording: None,
            snapshot: None,
        })
    }

    #[test]
    fn test_insert_new_identity() {
        let mut store = AlertStore::new(100);
        assert!(!store.insert(alert("a1", "cam-1")));
        assert!(!store.insert(alert("a2", "cam-1")));
        assert_eq!(store.live_count(), 2);
        assert_eq!(store.history_len(), 2);
        assert_eq!(store.history()[0].id, "a2");
    }

    #[test]
    fn test_insert_repeated_identity_replaces() {
        let mut store = AlertStore::new(100);
        store.insert(alert("a1", "cam-1"));

        let mut updated = alert("a1", "cam-1");
        updated.summary = "Second pass".to_string();
        assert!(store.insert(updated));

        assert_eq!(store.live_count(), 1);
        assert_eq!(store.live("a1").unwrap().summary, "Second pass");
    }

    #[test]
    fn test_history_cap_evicts_oldest() {
        let mut store = AlertStore::new(100);
        for i in 0..101 {
            store.insert(alert(&format!("a{}", i), "cam-1"));
        }

        let history = store.history();
        assert_eq!(history.len(), 100);
        assert_eq!(history[0].id, "a100");
        assert_eq!(history[99].id, "a1");
        assert!(history.iter().all(|a| a.id != "a0"));
    }

    #[test]
    fn test_acknowledge_marks_history() {
        let mut store = AlertStore::new(10);
        store.insert(alert("a1", "cam-1"));

        let removed = store.acknowledge("a1", Some("operator"), Utc::now());
        assert!(removed.is_some());
        assert_eq!(store.live_count(), 0);

        let history = store.history();
        assert!(history[0].acknowledged);
        assert_eq!(history[0].acknowledged_by.as_deref(), Some("operator"));
    }

    #[test]
    fn test_acknowledge_unknown_is_noop() {
        let mut store = AlertStore::new(10);
        store.insert(alert("a1", "cam-1"));

        assert!(store.acknowledge("missing", None, Utc::now()).is_none());
        assert_eq!(store.live_count(), 1);
        assert!(!store.history()[0].acknowledged);
    }

    #[test]
    fn test_acknowledge_after_expiry_still_marks_history() {
        let mut store = AlertStore::new(10);
        store.insert(alert("a1", "cam-1"));
        store.remove_live("a1");

        assert!(store.acknowledge("a1", Some("op"), Utc::now()).is_none());
        assert!(store.history()[0].acknowledged);
    }

    #[test]
    fn test_purge_device() {
        let mut store = AlertStore::new(10);
        store.insert(alert("a1", "cam-1"));
        store.insert(alert("a2", "cam-1"));
        store.insert(alert("a3", "cam-2"));

        let purged = store.purge_device("cam-1");
        assert_eq!(purged.len(), 2);
        assert_eq!(store.live_count(), 1);
        assert!(store.live("a3").is_some());
        assert_eq!(store.history_len(), 3);
    }

    #[test]
    fn test_clear_live_keeps_history() {
        let mut store = AlertStore::new(10);
        store.insert(alert("a1", "cam-1"));
        store.insert(alert("a2", "cam-2"));

        assert_eq!(store.clear_live().len(), 2);
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.history_len(), 2);
    }

    #[test]
    fn test_history_queries() {
        let mut store = AlertStore::new(10);
        store.insert(alert("a1", "cam-1"));
        store.insert(alert("a2", "cam-2"));
        store.insert(alert("a3", "cam-1"));

        let by_device = store.history_by_device("cam-1", 10);
        assert_eq!(by_device.len(), 2);
        assert_eq!(by_device[0].id, "a3");

        let latest = store.history_latest(1);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, "a3");
    }
}
