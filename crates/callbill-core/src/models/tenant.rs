//! Tenant model
//!
//! Tenants are provisioned out-of-band. The engine only reads them to learn
//! which bot a new call is placed against.

use serde::{Deserialize, Serialize};

/// Reference to the bot a tenant's calls are placed against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotRef {
    /// Bot identifier, copied onto every call
    pub bot_id: String,

    /// Human readable bot name
    pub display_name: Option<String>,
}

/// Tenant entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique identifier
    pub id: i32,

    /// Tenant display name
    pub name: String,

    /// Associated bot
    pub bot: BotRef,
}

impl Tenant {
    pub fn new(id: i32, name: impl Into<String>, bot_id: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            bot: BotRef {
                bot_id: bot_id.into(),
                display_name: None,
            },
        }
    }

    pub fn with_bot_name(mut self, display_name: impl Into<String>) -> Self {
        self.bot.display_name = Some(display_name.into());
        self
    }
}
