//! Persistence of the authenticated [`Session`].

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use platesync_shared::models::{Session, User};
use platesync_shared::types::{CarId, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Store `session`, replacing any previous one.
    pub fn save_session(&self, session: &Session) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO session (id, user_id, email, token, active_car_id, saved_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![
                session.user.id.0,
                session.user.email,
                session.token,
                session.active_car_id.map(|c| c.0),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<Session>> {
        let session = self
            .conn()
            .query_row(
                "SELECT user_id, email, token, active_car_id FROM session WHERE id = 1",
                [],
                |row| {
                    let user_id: i64 = row.get(0)?;
                    let email: String = row.get(1)?;
                    let token: String = row.get(2)?;
                    let active_car_id: Option<i64> = row.get(3)?;
                    Ok(Session {
                        user: User {
                            id: UserId(user_id),
                            email,
                        },
                        token,
                        active_car_id: active_car_id.map(CarId),
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /// Remove the stored session. Returns `true` if one existed.
    pub fn clear_session(&self) -> Result<bool> {
        let affected = self.conn().execute("DELETE FROM session WHERE id = 1", [])?;
        Ok(affected > 0)
    }
}
