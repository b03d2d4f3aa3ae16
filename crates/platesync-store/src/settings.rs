//! Device settings stored as JSON values under string keys.

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use platesync_shared::types::UserId;

use crate::database::Database;
use crate::error::Result;

const PUSH_TOKEN_KEY: &str = "push_token";

/// The push-delivery token last registered with the backend, and for whom.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredPushToken {
    pub user_id: UserId,
    pub token: String,
}

impl Database {
    pub fn get_setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, json],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    pub fn registered_push_token(&self) -> Result<Option<RegisteredPushToken>> {
        self.get_setting(PUSH_TOKEN_KEY)
    }

    pub fn remember_push_token(&self, registered: &RegisteredPushToken) -> Result<()> {
        self.set_setting(PUSH_TOKEN_KEY, registered)
    }

    pub fn forget_push_token(&self) -> Result<bool> {
        self.delete_setting(PUSH_TOKEN_KEY)
    }
}
