//! Static directory: membership and acknowledgements from fixed maps.
//!
//! Backs the CLI (seeded from `[directory]` config) and tests. Real chat
//! integrations implement the same traits against their platform APIs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use watchbell_core::config::DirectoryConfig;
use watchbell_core::error::Result;
use watchbell_core::traits::{AcknowledgementSource, MembershipSource};

#[derive(Default)]
pub struct StaticDirectory {
    members: RwLock<HashMap<String, Vec<String>>>,
    responders: RwLock<HashMap<String, Vec<String>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self {
            members: RwLock::new(config.members.clone()),
            responders: RwLock::new(config.responders.clone()),
        }
    }

    pub fn set_members(&self, container_id: &str, users: Vec<String>) {
        self.members
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(container_id.to_string(), users);
    }

    pub fn set_responders(&self, item_id: &str, users: Vec<String>) {
        self.responders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item_id.to_string(), users);
    }
}

#[async_trait]
impl MembershipSource for StaticDirectory {
    async fn get_accessible_users(&self, container_id: &str) -> Result<Vec<String>> {
        Ok(self
            .members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(container_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl AcknowledgementSource for StaticDirectory {
    async fn get_current_responders(&self, item_id: &str) -> Result<Vec<String>> {
        Ok(self
            .responders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(item_id)
            .cloned()
            .unwrap_or_default())
    }
}
