use std::collections::HashSet;

use argon2::{
    password_hash::{rand_core::OsRng, Result as HashResult, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use futures::TryStreamExt as _;
use garde::Validate;
use komik_types::{claim::Role, general::ValidEmail};
use serde::{Deserialize, Serialize};
use sqlx::Pool;
use tracing::debug;

use crate::{error::Result, Error};

fn hash_password(password: &str) -> HashResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)?
        .to_string();
    Ok(password_hash)
}

fn verify_password(password: &str, password_hash: &str) -> HashResult<bool> {
    let parsed_hash = PasswordHash::new(password_hash)?;
    let res = Argon2::default().verify_password(password.as_bytes(), &parsed_hash);
    if let Err(e) = res {
        debug!("Invalid password, error {e}");
    }
    Ok(res.is_ok())
}

fn is_valid_role(role: &str, _ctx: &()) -> garde::Result {
    role.parse::<Role>()
        .map_err(|e| garde::Error::new(e.to_string()))
        .map(|_| ())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Free,
    Membership,
}

impl AccountType {
    fn as_str(&self) -> &'static str {
        match self {
            AccountType::Free => "free",
            AccountType::Membership => "membership",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct CreateUser {
    #[garde(dive)]
    pub email: ValidEmail,
    #[garde(length(min = 3, max = 255))]
    pub name: Option<String>,
    #[garde(length(min = 8, max = 255))]
    pub password: Option<String>,
    #[garde(inner(inner(custom(is_valid_role))))]
    pub roles: Option<Vec<String>>,
}

#[derive(Debug, sqlx::FromRow)]
struct UserAccountRow {
    id: i64,
    name: Option<String>,
    email: String,
    roles: Option<String>,
    account_type: String,
    membership_start: Option<i64>,
    membership_end: Option<i64>,
    coins: i64,
    version: i64,
}

/// Account record as the rest of the system sees it - the password hash never
/// leaves this module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub name: Option<String>,
    pub email: String,
    pub roles: Option<Vec<String>>,
    pub account_type: AccountType,
    /// Membership window bounds as epoch millis; `None` end means permanent.
    pub membership_start: Option<i64>,
    pub membership_end: Option<i64>,
    pub coins: i64,
    pub version: i64,
}

impl UserAccount {
    /// Membership state at the given wall-clock instant. Must be evaluated on
    /// every access - a membership can expire between two requests.
    pub fn membership_active(&self, now_ms: i64) -> bool {
        self.account_type == AccountType::Membership
            && self.membership_end.map(|end| now_ms < end).unwrap_or(true)
    }
}

impl From<UserAccountRow> for UserAccount {
    fn from(value: UserAccountRow) -> Self {
        let account_type = match value.account_type.as_str() {
            "membership" => AccountType::Membership,
            _ => AccountType::Free,
        };
        Self {
            id: value.id,
            name: value.name,
            email: value.email,
            roles: value.roles.map(|s| {
                s.split(',')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect()
            }),
            account_type,
            membership_start: value.membership_start,
            membership_end: value.membership_end,
            coins: value.coins,
            version: value.version,
        }
    }
}

/// Result of a coin unlock of a single chapter.
#[derive(Debug, Serialize, Deserialize)]
pub struct Purchase {
    pub chapter_id: i64,
    pub price: i64,
    pub coins: i64,
    pub already_owned: bool,
}

const USER_COLUMNS: &str =
    "id, name, email, roles, account_type, membership_start, membership_end, coins, version";

pub type UserAccountRepository = UserAccountRepositoryImpl<Pool<crate::ChosenDB>>;

pub struct UserAccountRepositoryImpl<E> {
    executor: E,
}

impl<'c, E> UserAccountRepositoryImpl<E>
where
    for<'a> &'a E: sqlx::Executor<'c, Database = crate::ChosenDB>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn create(&self, payload: CreateUser) -> Result<UserAccount> {
        let password = payload.password.map(|p| hash_password(&p)).transpose()?;
        let email = payload.email.as_ref();
        let roles = payload.roles.map(|roles| roles.join(","));
        let result = sqlx::query(
            "INSERT INTO users (name, email, password, roles, account_type) VALUES (?, ?, ?, ?, 'free')",
        )
        .bind(&payload.name)
        .bind(email)
        .bind(&password)
        .bind(&roles)
        .execute(&self.executor)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id).await
    }

    pub async fn get(&self, id: i64) -> Result<UserAccount> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let user = sqlx::query_as::<_, UserAccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.executor)
            .await?
            .ok_or_else(|| Error::RecordNotFound("User".to_string()))?;
        Ok(user.into())
    }

    pub async fn find_by_email(&self, email: &str) -> Result<UserAccount> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
        let user = sqlx::query_as::<_, UserAccountRow>(&sql)
            .bind(email)
            .fetch_optional(&self.executor)
            .await?
            .ok_or_else(|| Error::RecordNotFound("User".to_string()))?;
        Ok(user.into())
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<UserAccount>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT ?");
        let users = sqlx::query_as::<_, UserAccountRow>(&sql)
            .bind(limit as i64)
            .fetch(&self.executor)
            .map_ok(UserAccount::from)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(users)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let res = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.executor)
            .await?;

        if res.rows_affected() == 0 {
            Err(Error::RecordNotFound("User".to_string()))
        } else {
            Ok(())
        }
    }

    pub async fn check_password(&self, email: &str, password: &str) -> Result<UserAccount> {
        let row: Option<(i64, Option<String>)> =
            sqlx::query_as("SELECT id, password FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.executor)
                .await?;
        let Some((id, hashed_password)) = row else {
            debug!("Unknown user {email}");
            return Err(Error::InvalidCredentials);
        };
        if let Some(hashed_password) = hashed_password {
            if verify_password(password, &hashed_password).unwrap_or(false) {
                return self.get(id).await;
            }
        }
        Err(Error::InvalidCredentials)
    }

    pub async fn change_password(
        &self,
        id: i64,
        old_password: Option<&str>,
        new_password: &str,
    ) -> Result<()> {
        let current: Option<Option<String>> =
            sqlx::query_scalar("SELECT password FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.executor)
                .await?;
        let current = current.ok_or_else(|| Error::RecordNotFound("User".to_string()))?;
        if let Some(current_hash) = current {
            let old = old_password.ok_or(Error::InvalidCredentials)?;
            if !verify_password(old, &current_hash).unwrap_or(false) {
                return Err(Error::InvalidCredentials);
            }
        }
        let new_hash = hash_password(new_password)?;
        sqlx::query("UPDATE users SET password = ?, modified = datetime() WHERE id = ?")
            .bind(new_hash)
            .bind(id)
            .execute(&self.executor)
            .await?;
        Ok(())
    }

    pub async fn set_roles(&self, id: i64, roles: Vec<Role>) -> Result<UserAccount> {
        let roles = roles
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let res = sqlx::query("UPDATE users SET roles = ?, modified = datetime() WHERE id = ?")
            .bind(roles)
            .bind(id)
            .execute(&self.executor)
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::RecordNotFound("User".to_string()));
        }
        self.get(id).await
    }

    pub async fn grant_membership(
        &self,
        id: i64,
        start_ms: i64,
        end_ms: Option<i64>,
    ) -> Result<UserAccount> {
        let res = sqlx::query(
            "UPDATE users SET account_type = ?, membership_start = ?, membership_end = ?, \
             modified = datetime() WHERE id = ?",
        )
        .bind(AccountType::Membership.as_str())
        .bind(start_ms)
        .bind(end_ms)
        .bind(id)
        .execute(&self.executor)
        .await?;
        if res.rows_affected() == 0 {
            return Err(Error::RecordNotFound("User".to_string()));
        }
        self.get(id).await
    }

    pub async fn revoke_membership(&self, id: i64) -> Result<UserAccount> {
        let res = sqlx::query(
            "UPDATE users SET account_type = ?, membership_start = NULL, membership_end = NULL, \
             modified = datetime() WHERE id = ?",
        )
        .bind(AccountType::Free.as_str())
        .bind(id)
        .execute(&self.executor)
        .await?;
        if res.rows_affected() == 0 {
            return Err(Error::RecordNotFound("User".to_string()));
        }
        self.get(id).await
    }

    /// Adjusts the coin balance by `delta` (positive or negative), refusing to
    /// take the balance below zero. Returns the new balance.
    pub async fn adjust_coins(&self, id: i64, delta: i64) -> Result<i64> {
        let res = sqlx::query(
            "UPDATE users SET coins = coins + ?, modified = datetime() \
             WHERE id = ? AND coins + ? >= 0",
        )
        .bind(delta)
        .bind(id)
        .bind(delta)
        .execute(&self.executor)
        .await?;
        if res.rows_affected() == 0 {
            let current: Option<i64> = sqlx::query_scalar("SELECT coins FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.executor)
                .await?;
            return match current {
                None => Err(Error::RecordNotFound("User".to_string())),
                Some(available) => Err(Error::InsufficientCoins {
                    needed: -delta,
                    available,
                }),
            };
        }
        let coins = sqlx::query_scalar("SELECT coins FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(&self.executor)
            .await?;
        Ok(coins)
    }

    /// Chapter ids this user has explicitly unlocked with coins.
    pub async fn purchased_chapters(&self, id: i64) -> Result<HashSet<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT chapter_id FROM chapter_purchase WHERE user_id = ?",
        )
        .bind(id)
        .fetch(&self.executor)
        .try_collect::<Vec<_>>()
        .await?;
        Ok(ids.into_iter().collect())
    }
}

impl UserAccountRepositoryImpl<Pool<crate::ChosenDB>> {
    /// Unlocks a chapter by spending coins. Balance check, decrement and the
    /// purchase record are one transaction, so a racing purchase cannot spend
    /// the same coins twice. Idempotent for an already owned chapter.
    pub async fn purchase_chapter(&self, user_id: i64, chapter_id: i64) -> Result<Purchase> {
        let mut tx = self.executor.begin().await?;

        let owned: Option<i64> = sqlx::query_scalar(
            "SELECT price FROM chapter_purchase WHERE user_id = ? AND chapter_id = ?",
        )
        .bind(user_id)
        .bind(chapter_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(price) = owned {
            let coins = sqlx::query_scalar("SELECT coins FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;
            return Ok(Purchase {
                chapter_id,
                price,
                coins,
                already_owned: true,
            });
        }

        let chapter: Option<(Option<i64>, bool)> =
            sqlx::query_as("SELECT coin_price, is_free FROM chapter WHERE id = ?")
                .bind(chapter_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((price, is_free)) = chapter else {
            return Err(Error::RecordNotFound("Chapter".to_string()));
        };
        let price = price.unwrap_or(0);
        if is_free || price <= 0 {
            return Err(Error::NotPurchasable);
        }

        let res = sqlx::query(
            "UPDATE users SET coins = coins - ?, modified = datetime() \
             WHERE id = ? AND coins >= ?",
        )
        .bind(price)
        .bind(user_id)
        .bind(price)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            let available: Option<i64> = sqlx::query_scalar("SELECT coins FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
            return match available {
                None => Err(Error::RecordNotFound("User".to_string())),
                Some(available) => Err(Error::InsufficientCoins {
                    needed: price,
                    available,
                }),
            };
        }

        sqlx::query("INSERT INTO chapter_purchase (user_id, chapter_id, price) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(chapter_id)
            .bind(price)
            .execute(&mut *tx)
            .await?;

        let coins = sqlx::query_scalar("SELECT coins FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Purchase {
            chapter_id,
            price,
            coins,
            already_owned: false,
        })
    }
}
