use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin cycle over proxy connection strings, shared by all workers of
/// one crawl. An empty rotation means direct connections.
#[derive(Debug, Default)]
pub struct ProxyRotation {
    proxies: Vec<String>,
    cursor: AtomicUsize,
}

impl ProxyRotation {
    pub fn new(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The proxy for the next fetch attempt, or `None` for a direct connection.
    pub fn next(&self) -> Option<&str> {
        if self.proxies.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        Some(self.proxies[idx].as_str())
    }

    pub fn proxies(&self) -> &[String] {
        &self.proxies
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
