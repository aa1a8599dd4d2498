// Session verification against the external account system.
//
// The engine never issues or refreshes sessions; it only resolves an
// opaque token to a verified identity at connection admission time.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;
use waypoint_common::types::Identity;

use crate::error::EngineError;

/// Looks up session tokens in the account store.
///
/// The Memory variant backs tests; production uses the shared Postgres
/// pool and treats the sessions/users tables as read-only.
#[derive(Clone)]
pub enum SessionStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<HashMap<String, Identity>>>),
}

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: i64,
    username: String,
    is_admin: bool,
}

impl SessionStore {
    /// Resolve a session token to its verified identity.
    ///
    /// `Ok(None)` means the token is unknown, expired, or carries no
    /// usable identity; the caller must refuse the connection.
    pub async fn verify(&self, token: &str) -> Result<Option<Identity>, EngineError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, IdentityRow>(
                    r#"
                    SELECT u.id, u.username, u.is_admin
                    FROM sessions AS s
                    INNER JOIN users AS u ON u.id = s.user_id
                    WHERE s.token = $1
                      AND s.expires_at > NOW()
                    "#,
                )
                .bind(token)
                .fetch_optional(pool)
                .await?;

                Ok(row.map(|row| Identity {
                    user_id: row.id,
                    username: row.username,
                    is_admin: row.is_admin,
                }))
            }
            Self::Memory(store) => Ok(store.read().await.get(token).cloned()),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    #[cfg(test)]
    pub(crate) async fn grant_for_tests(&self, token: &str, identity: Identity) {
        if let Self::Memory(store) = self {
            store.write().await.insert(token.to_owned(), identity);
        }
    }
}
