//! Users repository: accounts, tokens and network lookups.
//!
//! Authentication methods answer `None` for any fault (missing user, bad
//! password, database error) - errors are logged here and never propagate
//! into the caller's control flow. Password hashes never leave this module.

use super::{DbError, Network};
use sqlx::SqlitePool;
use tracing::error;

/// A user account, without its password hash.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub admin: bool,
    pub created_at: i64,
}

/// The result of authenticating a user against one of their networks.
#[derive(Debug, Clone)]
pub struct AuthedNetwork {
    pub network: Network,
    pub user_admin: bool,
}

#[derive(sqlx::FromRow)]
struct NetworkAuthRow {
    #[sqlx(flatten)]
    network: Network,
    user_pass: String,
    user_admin: bool,
}

const USER_COLUMNS: &str = "id, username, admin, created_at";

/// Repository for user operations.
pub struct Users<'a> {
    pool: &'a SqlitePool,
}

impl<'a> Users<'a> {
    /// Create a new users repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Authenticate a user and resolve one of their networks in one step.
    pub async fn auth_user_network(
        &self,
        username: &str,
        password: &str,
        network: &str,
    ) -> Option<AuthedNetwork> {
        let row: Option<NetworkAuthRow> = match sqlx::query_as(
            r#"
            SELECT
                nets.*,
                users.password AS user_pass,
                users.admin AS user_admin
            FROM user_networks nets
            INNER JOIN users ON users.id = nets.user_id
            WHERE users.username = ? AND nets.name = ?
            "#,
        )
        .bind(username)
        .bind(network)
        .fetch_optional(self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, "Error logging user in");
                return None;
            }
        };

        let row = row?;
        if !verify_password(password, &row.user_pass) {
            return None;
        }

        Some(AuthedNetwork {
            network: row.network,
            user_admin: row.user_admin,
        })
    }

    /// Authenticate a user by username and password.
    pub async fn auth_user(&self, username: &str, password: &str) -> Option<User> {
        let row: Option<(i64, String, String, bool, i64)> = match sqlx::query_as(
            "SELECT id, username, password, admin, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, "Error logging user in");
                return None;
            }
        };

        let (id, username, hash, admin, created_at) = row?;
        if !verify_password(password, &hash) {
            return None;
        }

        Some(User {
            id,
            username,
            admin,
            created_at,
        })
    }

    /// Authenticate by a previously generated token.
    pub async fn auth_user_token(&self, token: &str) -> Option<User> {
        let user_id: Option<i64> =
            match sqlx::query_scalar("SELECT user_id FROM user_tokens WHERE token = ?")
                .bind(token)
                .fetch_optional(self.pool)
                .await
            {
                Ok(row) => row,
                Err(e) => {
                    error!(error = %e, "Error resolving user token");
                    return None;
                }
            };

        let user_id = user_id?;
        sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(user_id)
        .fetch_optional(self.pool)
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "Error loading token user");
            None
        })
    }

    /// Generate and store a fresh auth token for a user.
    pub async fn generate_user_token(&self, user_id: i64) -> Result<String, DbError> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO user_tokens (token, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(user_id)
            .bind(chrono::Utc::now().timestamp())
            .execute(self.pool)
            .await?;
        Ok(token)
    }

    /// Look up a user by name.
    pub async fn get_user(&self, username: &str) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(self.pool)
        .await?;
        Ok(user)
    }

    /// Create a user with a hashed password.
    pub async fn add_user(&self, username: &str, password: &str) -> Result<User, DbError> {
        let hash =
            bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| DbError::Hash(e.to_string()))?;

        sqlx::query("INSERT INTO users (username, password, admin, created_at) VALUES (?, ?, 0, ?)")
            .bind(username)
            .bind(&hash)
            .bind(chrono::Utc::now().timestamp())
            .execute(self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return DbError::UserExists(username.to_string());
                }
                DbError::from(e)
            })?;

        self.get_user(username)
            .await?
            .ok_or_else(|| DbError::UserNotFound(username.to_string()))
    }

    /// Replace a user's password.
    pub async fn change_user_password(&self, id: i64, password: &str) -> Result<(), DbError> {
        let hash =
            bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| DbError::Hash(e.to_string()))?;

        sqlx::query("UPDATE users SET password = ? WHERE id = ?")
            .bind(&hash)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// All networks belonging to a user.
    pub async fn get_user_networks(&self, user_id: i64) -> Result<Vec<Network>, DbError> {
        let networks = sqlx::query_as("SELECT * FROM user_networks WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(self.pool)
            .await?;
        Ok(networks)
    }

    /// Look up a network by id.
    pub async fn get_network(&self, id: i64) -> Result<Option<Network>, DbError> {
        let network = sqlx::query_as("SELECT * FROM user_networks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(network)
    }

    /// Look up a user's network by name.
    pub async fn get_network_by_name(
        &self,
        user_id: i64,
        name: &str,
    ) -> Result<Option<Network>, DbError> {
        let network = sqlx::query_as("SELECT * FROM user_networks WHERE user_id = ? AND name = ?")
            .bind(user_id)
            .bind(name)
            .fetch_optional(self.pool)
            .await?;
        Ok(network)
    }

    /// Create an empty network definition for a user.
    pub async fn add_network(&self, user_id: i64, name: &str) -> Result<Network, DbError> {
        sqlx::query("INSERT INTO user_networks (user_id, name) VALUES (?, ?)")
            .bind(user_id)
            .bind(name)
            .execute(self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return DbError::NetworkExists(name.to_string());
                }
                DbError::from(e)
            })?;

        self.get_network_by_name(user_id, name)
            .await?
            .ok_or_else(|| DbError::NetworkNotFound(name.to_string()))
    }

    /// Persist an edited network definition.
    pub async fn save_network(&self, network: &Network) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE user_networks SET
                name = ?, host = ?, port = ?, tls = ?, bind_host = ?,
                nick = ?, username = ?, realname = ?, password = ?,
                sasl_account = ?, sasl_pass = ?
            WHERE id = ?
            "#,
        )
        .bind(&network.name)
        .bind(&network.host)
        .bind(network.port)
        .bind(network.tls)
        .bind(&network.bind_host)
        .bind(&network.nick)
        .bind(&network.username)
        .bind(&network.realname)
        .bind(&network.password)
        .bind(&network.sasl_account)
        .bind(network.sasl_pass_raw())
        .bind(network.id)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

fn verify_password(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(correct) => correct,
        Err(e) => {
            error!(error = %e, "Error verifying password hash");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn test_db() -> Database {
        Database::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_add_and_auth_user() {
        let db = test_db().await;
        let users = db.users();

        let user = users.add_user("alice", "hunter2").await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(!user.admin);

        assert!(users.auth_user("alice", "hunter2").await.is_some());
        assert!(users.auth_user("alice", "wrong").await.is_none());
        assert!(users.auth_user("nobody", "hunter2").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let db = test_db().await;
        let users = db.users();

        users.add_user("alice", "pw").await.unwrap();
        assert!(matches!(
            users.add_user("alice", "pw").await,
            Err(DbError::UserExists(_))
        ));
    }

    #[tokio::test]
    async fn test_change_password() {
        let db = test_db().await;
        let users = db.users();

        let user = users.add_user("alice", "old").await.unwrap();
        users.change_user_password(user.id, "new").await.unwrap();

        assert!(users.auth_user("alice", "old").await.is_none());
        assert!(users.auth_user("alice", "new").await.is_some());
    }

    #[tokio::test]
    async fn test_token_auth() {
        let db = test_db().await;
        let users = db.users();

        let user = users.add_user("alice", "pw").await.unwrap();
        let token = users.generate_user_token(user.id).await.unwrap();
        assert!(!token.contains('-'));

        let authed = users.auth_user_token(&token).await.unwrap();
        assert_eq!(authed.username, "alice");
        assert!(users.auth_user_token("bogus").await.is_none());
    }

    #[tokio::test]
    async fn test_auth_user_network() {
        let db = test_db().await;
        let users = db.users();

        let user = users.add_user("alice", "pw").await.unwrap();
        let mut network = users.add_network(user.id, "libera").await.unwrap();
        network.host = Some("irc.libera.chat".into());
        network.port = Some(6697);
        network.tls = true;
        users.save_network(&network).await.unwrap();

        let authed = users
            .auth_user_network("alice", "pw", "libera")
            .await
            .unwrap();
        assert_eq!(authed.network.host.as_deref(), Some("irc.libera.chat"));
        assert!(!authed.user_admin);

        assert!(users.auth_user_network("alice", "no", "libera").await.is_none());
        assert!(users.auth_user_network("alice", "pw", "oftc").await.is_none());
    }

    #[tokio::test]
    async fn test_network_queries() {
        let db = test_db().await;
        let users = db.users();

        let user = users.add_user("alice", "pw").await.unwrap();
        users.add_network(user.id, "libera").await.unwrap();
        users.add_network(user.id, "oftc").await.unwrap();

        let networks = users.get_user_networks(user.id).await.unwrap();
        assert_eq!(networks.len(), 2);

        let byname = users
            .get_network_by_name(user.id, "oftc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(byname.name, "oftc");

        let byid = users.get_network(byname.id).await.unwrap().unwrap();
        assert_eq!(byid.name, "oftc");
    }
}
