use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::{Window, WindowState};

/// Injectable device → window map.
///
/// Windows are created lazily on first sample and live as long as the store.
/// Clones share the same map.
#[derive(Clone)]
pub struct WindowStore {
    windows: Arc<RwLock<HashMap<String, Arc<Mutex<Window>>>>>,
    window_size: usize,
}

impl WindowStore {
    pub fn new(window_size: usize) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// The window slot for `device`, created empty if it does not exist yet.
    pub async fn slot(&self, device: &str) -> Arc<Mutex<Window>> {
        if let Some(slot) = self.windows.read().await.get(device) {
            return Arc::clone(slot);
        }

        let mut windows = self.windows.write().await;
        Arc::clone(
            windows
                .entry(device.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Window::new(self.window_size)))),
        )
    }

    pub async fn device_count(&self) -> usize {
        self.windows.read().await.len()
    }

    /// Current fill state of every known device, sorted by device id.
    pub async fn states(&self) -> Vec<(String, WindowState)> {
        let slots: Vec<(String, Arc<Mutex<Window>>)> = self
            .windows
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut states = Vec::with_capacity(slots.len());
        for (device, slot) in slots {
            let state = slot.lock().await.state();
            states.push((device, state));
        }
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
