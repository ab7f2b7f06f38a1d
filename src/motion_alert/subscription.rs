//! Subscription registry
//!
//! Ordered set of device ids this consumer wants alerts for. Kept across
//! channel teardown so every (re)connect can replay it in insertion order.

use tokio::sync::RwLock;

#[derive(Default)]
pub struct SubscriptionRegistry {
    devices: RwLock<Vec<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a device. Returns false if it was already present.
    pub async fn add(&self, device_id: &str) -> bool {
        let mut devices = self.devices.write().await;
        if devices.iter().any(|d| d == device_id) {
            return false;
        }
        devices.push(device_id.to_string());
        true
    }

    /// Forget a device. Returns false if it was not present.
    pub async fn remove(&self, device_id: &str) -> bool {
        let mut devices = self.devices.write().await;
        let before = devices.len();
        devices.retain(|d| d != device_id);
        devices.len() != before
    }

    pub async fn contains(&self, device_id: &str) -> bool {
        self.devices.read().await.iter().any(|d| d == device_id)
    }

    /// Devices in registry order
    pub async fn list(&self) -> Vec<String> {
        self.devices.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_keeps_insertion_order() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.add("cam-2").await);
        assert!(registry.add("cam-1").await);
        assert!(registry.add("cam-3").await);

        assert_eq!(registry.list().await, vec!["cam-2", "cam-1", "cam-3"]);
    }

    #[tokio::test]
    async fn test_add_duplicate() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.add("cam-1").await);
        assert!(!registry.add("cam-1").await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = SubscriptionRegistry::new();
        registry.add("cam-1").await;
        registry.add("cam-2").await;

        assert!(registry.remove("cam-1").await);
        assert!(!registry.remove("cam-1").await);
        assert!(!registry.contains("cam-1").await);
        assert!(registry.contains("cam-2").await);
        assert!(!registry.is_empty().await);
    }
}
