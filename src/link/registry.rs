//! Named collection of links for multi-device setups.
//!
//! The registry is an owned value: the surrounding application creates one
//! and passes it where needed. There is no global instance.

use std::collections::HashMap;
use std::sync::Mutex;

use super::DeviceLink;

#[derive(Default)]
pub struct LinkRegistry {
    links: Mutex<HashMap<String, DeviceLink>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link under `name`, returning the one it replaced, if any.
    pub fn register(&self, name: &str, link: DeviceLink) -> Option<DeviceLink> {
        self.links.lock().unwrap().insert(name.to_string(), link)
    }

    pub fn get(&self, name: &str) -> Option<DeviceLink> {
        self.links.lock().unwrap().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<DeviceLink> {
        self.links.lock().unwrap().remove(name)
    }

    /// Registered names, sorted for stable display.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.links.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.lock().unwrap().is_empty()
    }
}
