use chrono::{DateTime, Duration, Utc};
use sqlx::{Executor, FromRow, PgPool, Postgres, QueryBuilder};

use crate::models::*;

// ─── Guild Queries ──────────────────────────────────────────────────────────

/// Ids of all visible guilds, newest first.
pub async fn list_guild_ids_by_recency(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM guild WHERE hidden = FALSE ORDER BY create_time DESC")
        .fetch_all(pool)
        .await
}

/// Get every guild, hidden ones included.
pub async fn list_guilds(pool: &PgPool) -> Result<Vec<Guild>, sqlx::Error> {
    sqlx::query_as::<_, Guild>(
        "SELECT id, hidden, create_time, limited_time_quantity FROM guild",
    )
    .fetch_all(pool)
    .await
}

/// Insert a guild and all of its roles in one transaction.
pub async fn insert_guild(pool: &PgPool, guild: &NewGuild) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO guild (id, hidden, create_time, limited_time_quantity)
        VALUES ($1, $2, COALESCE($3, NOW()), $4)
        "#,
    )
    .bind(&guild.id)
    .bind(guild.hidden)
    .bind(guild.create_time)
    .bind(guild.limited_time_quantity)
    .execute(&mut *tx)
    .await?;

    insert_roles_batch(&mut *tx, &guild.id, &guild.roles).await?;

    tx.commit().await?;

    tracing::info!(
        guild_id = %guild.id,
        roles = guild.roles.len(),
        "Guild inserted"
    );
    Ok(())
}

/// Update a guild's scalar fields and reconcile its roles, atomically.
///
/// With a non-empty role list, stored roles missing from it are deleted and
/// the listed ones are upserted. Returns the number of guild rows updated.
pub async fn update_guild(
    pool: &PgPool,
    guild_id: &str,
    update: &GuildUpdate,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE guild
        SET hidden = COALESCE($2, hidden),
            limited_time_quantity = COALESCE($3, limited_time_quantity)
        WHERE id = $1
        "#,
    )
    .bind(guild_id)
    .bind(update.hidden)
    .bind(update.limited_time_quantity)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if update.roles.is_empty() {
        tx.commit().await?;
        return Ok(updated);
    }

    let existing: Vec<String> = sqlx::query_scalar("SELECT id FROM role WHERE guild_id = $1")
        .bind(guild_id)
        .fetch_all(&mut *tx)
        .await?;

    let stale = stale_role_ids(&existing, &update.roles);
    if !stale.is_empty() {
        sqlx::query("DELETE FROM role WHERE id = ANY($1)")
            .bind(&stale)
            .execute(&mut *tx)
            .await?;
    }

    upsert_roles_batch(&mut *tx, guild_id, &update.roles).await?;

    tx.commit().await?;

    tracing::info!(
        guild_id = guild_id,
        deleted = stale.len(),
        upserted = update.roles.len(),
        "Guild roles reconciled"
    );
    Ok(updated)
}

/// Get a guild with its roles ordered by amount, formatted for display.
pub async fn get_guild_by_id(pool: &PgPool, guild_id: &str) -> Result<Option<GuildView>, sqlx::Error> {
    let guild = sqlx::query_as::<_, Guild>(
        "SELECT id, hidden, create_time, limited_time_quantity FROM guild WHERE id = $1",
    )
    .bind(guild_id)
    .fetch_optional(pool)
    .await?;

    let Some(guild) = guild else {
        return Ok(None);
    };

    // Order on the NUMERIC column, not the text alias.
    let roles = sqlx::query_as::<_, Role>(
        r#"
        SELECT role.id, role.amount::TEXT AS amount, role.guild_id
        FROM role
        WHERE role.guild_id = $1
        ORDER BY role.amount ASC, role.id ASC
        "#,
    )
    .bind(guild_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(GuildView::new(guild, roles)))
}

/// Ids of stored roles that are absent from the desired set.
fn stale_role_ids(existing: &[String], desired: &[NewRole]) -> Vec<String> {
    existing
        .iter()
        .filter(|id| !desired.iter().any(|role| &role.id == *id))
        .cloned()
        .collect()
}

// ─── Role Queries ───────────────────────────────────────────────────────────

/// Insert roles for a guild using a single multi-value INSERT.
async fn insert_roles_batch<'e, E>(
    executor: E,
    guild_id: &str,
    roles: &[NewRole],
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    if roles.is_empty() {
        return Ok(());
    }

    role_values(guild_id, roles).build().execute(executor).await?;
    Ok(())
}

/// Insert roles for a guild, overwriting amount and owner on id conflicts.
async fn upsert_roles_batch<'e, E>(
    executor: E,
    guild_id: &str,
    roles: &[NewRole],
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    if roles.is_empty() {
        return Ok(());
    }

    let mut qb = role_values(guild_id, roles);
    qb.push(" ON CONFLICT (id) DO UPDATE SET amount = EXCLUDED.amount, guild_id = EXCLUDED.guild_id");
    qb.build().execute(executor).await?;
    Ok(())
}

fn role_values<'a>(guild_id: &'a str, roles: &'a [NewRole]) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO role (id, amount, guild_id) ");

    qb.push_values(roles, |mut b, role| {
        b.push_bind(&role.id)
            .push_bind(&role.amount)
            .push_unseparated("::NUMERIC")
            .push_bind(guild_id);
    });
    qb
}

// ─── Access Token Queries ───────────────────────────────────────────────────

/// Get the token for `code` if it has not expired yet.
pub async fn find_valid_access_token(
    pool: &PgPool,
    code: &str,
) -> Result<Option<AccessToken>, sqlx::Error> {
    sqlx::query_as::<_, AccessToken>(
        "SELECT code, expires_at FROM access_token WHERE code = $1 AND expires_at > $2",
    )
    .bind(code)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
}

/// Insert a token, or move the expiry of an existing one.
pub async fn save_access_token(
    pool: &PgPool,
    token: &AccessToken,
) -> Result<AccessToken, sqlx::Error> {
    sqlx::query_as::<_, AccessToken>(
        r#"
        INSERT INTO access_token (code, expires_at)
        VALUES ($1, $2)
        ON CONFLICT (code) DO UPDATE SET expires_at = EXCLUDED.expires_at
        RETURNING code, expires_at
        "#,
    )
    .bind(&token.code)
    .bind(token.expires_at)
    .fetch_one(pool)
    .await
}

// ─── Role Purchase Queries ──────────────────────────────────────────────────

/// How far back an expiry may lie and still count as expiring.
pub fn expiry_grace() -> Duration {
    Duration::hours(1)
}

/// How far ahead of now an expiry counts as expiring.
pub fn expiry_lookahead() -> Duration {
    Duration::days(3) + Duration::hours(2)
}

/// The `(start, end]` window of expiries considered expiring at `now`.
pub fn expiring_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - expiry_grace(), now + expiry_lookahead())
}

/// Purchase columns with guild and role left-joined, prefixed to avoid clashes.
const PURCHASE_WITH_RELATIONS: &str = r#"
    SELECT rp.id, rp.discord_user_id, rp.guild_id, rp.role_id, rp.create_time, rp.expires_at,
           g.hidden AS guild_hidden,
           g.create_time AS guild_create_time,
           g.limited_time_quantity AS guild_limited_time_quantity,
           r.amount::TEXT AS role_amount,
           r.guild_id AS role_guild_id
    FROM role_purchase rp
    LEFT JOIN guild g ON g.id = rp.guild_id
    LEFT JOIN role r ON r.id = rp.role_id
"#;

/// Flat join row, split into a purchase and its optional relations.
#[derive(Debug, FromRow)]
struct PurchaseRow {
    id: i64,
    discord_user_id: String,
    guild_id: Option<String>,
    role_id: Option<String>,
    create_time: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    guild_hidden: Option<bool>,
    guild_create_time: Option<DateTime<Utc>>,
    guild_limited_time_quantity: Option<i32>,
    role_amount: Option<String>,
    role_guild_id: Option<String>,
}

impl From<PurchaseRow> for PurchaseWithRelations {
    fn from(row: PurchaseRow) -> Self {
        let guild = match (
            &row.guild_id,
            row.guild_hidden,
            row.guild_create_time,
            row.guild_limited_time_quantity,
        ) {
            (Some(id), Some(hidden), Some(create_time), Some(limited_time_quantity)) => {
                Some(Guild {
                    id: id.clone(),
                    hidden,
                    create_time,
                    limited_time_quantity,
                })
            }
            _ => None,
        };

        let role = match (&row.role_id, row.role_amount, row.role_guild_id) {
            (Some(id), Some(amount), Some(guild_id)) => Some(Role {
                id: id.clone(),
                amount,
                guild_id,
            }),
            _ => None,
        };

        Self {
            purchase: RolePurchase {
                id: row.id,
                discord_user_id: row.discord_user_id,
                guild_id: row.guild_id,
                role_id: row.role_id,
                create_time: row.create_time,
                expires_at: row.expires_at,
            },
            guild,
            role,
        }
    }
}

/// Record a new purchase.
pub async fn save_purchase(
    pool: &PgPool,
    purchase: &NewRolePurchase,
) -> Result<RolePurchase, sqlx::Error> {
    let saved = sqlx::query_as::<_, RolePurchase>(
        r#"
        INSERT INTO role_purchase (discord_user_id, guild_id, role_id, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, discord_user_id, guild_id, role_id, create_time, expires_at
        "#,
    )
    .bind(&purchase.discord_user_id)
    .bind(&purchase.guild_id)
    .bind(&purchase.role_id)
    .bind(purchase.expires_at)
    .fetch_one(pool)
    .await?;

    tracing::debug!(
        purchase_id = saved.id,
        discord_user_id = %saved.discord_user_id,
        "Role purchase saved"
    );
    Ok(saved)
}

/// Purchases expiring in the window around the current time.
pub async fn list_expiring_purchases(pool: &PgPool) -> Result<Vec<ExpiringPurchase>, sqlx::Error> {
    list_expiring_purchases_at(pool, Utc::now()).await
}

/// Purchases whose expiry lies in [`expiring_window`] of `now` and whose
/// guild and role both still exist.
pub async fn list_expiring_purchases_at(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<ExpiringPurchase>, sqlx::Error> {
    let (start, end) = expiring_window(now);
    let sql = format!(
        "{PURCHASE_WITH_RELATIONS} WHERE rp.expires_at > $1 AND rp.expires_at <= $2 \
         AND g.id IS NOT NULL AND r.id IS NOT NULL ORDER BY rp.expires_at ASC"
    );

    let rows = sqlx::query_as::<_, PurchaseRow>(&sql)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| ExpiringPurchase::try_from(PurchaseWithRelations::from(row)).ok())
        .collect())
}

/// Purchases of one role in one guild by one user.
pub async fn list_user_role_purchases(
    pool: &PgPool,
    discord_user_id: &str,
    guild_id: &str,
    role_id: &str,
) -> Result<Vec<RolePurchase>, sqlx::Error> {
    sqlx::query_as::<_, RolePurchase>(
        r#"
        SELECT id, discord_user_id, guild_id, role_id, create_time, expires_at
        FROM role_purchase
        WHERE discord_user_id = $1 AND guild_id = $2 AND role_id = $3
        ORDER BY id
        "#,
    )
    .bind(discord_user_id)
    .bind(guild_id)
    .bind(role_id)
    .fetch_all(pool)
    .await
}

/// Every purchase made in a guild, newest first.
pub async fn list_purchases_by_guild(
    pool: &PgPool,
    guild_id: &str,
) -> Result<Vec<PurchaseWithRelations>, sqlx::Error> {
    let sql = format!("{PURCHASE_WITH_RELATIONS} WHERE rp.guild_id = $1 ORDER BY rp.create_time DESC");

    let rows = sqlx::query_as::<_, PurchaseRow>(&sql)
        .bind(guild_id)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(PurchaseWithRelations::from).collect())
}

// ─── Wallet Queries ─────────────────────────────────────────────────────────

/// Register a wallet address for a user.
pub async fn create_wallet(
    pool: &PgPool,
    discord_user_id: &str,
    address: &str,
) -> Result<Wallet, sqlx::Error> {
    sqlx::query_as::<_, Wallet>(
        r#"
        INSERT INTO wallet (address, discord_user_id)
        VALUES ($1, $2)
        RETURNING id, address, discord_user_id
        "#,
    )
    .bind(address)
    .bind(discord_user_id)
    .fetch_one(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn role(id: &str) -> NewRole {
        NewRole {
            id: id.into(),
            amount: "1".into(),
        }
    }

    #[test]
    fn stale_roles_are_those_missing_from_input() {
        let existing = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let stale = stale_role_ids(&existing, &[role("b"), role("d")]);
        assert_eq!(stale, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn no_stale_roles_when_input_covers_existing() {
        let existing = vec!["a".to_string()];
        assert!(stale_role_ids(&existing, &[role("a"), role("b")]).is_empty());
    }

    #[test]
    fn expiring_window_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let (start, end) = expiring_window(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 10, 11, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 5, 13, 14, 0, 0).unwrap());
    }

    #[test]
    fn purchase_row_without_role_has_no_role() {
        let at = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let row = PurchaseRow {
            id: 7,
            discord_user_id: "u1".into(),
            guild_id: Some("g1".into()),
            role_id: None,
            create_time: at,
            expires_at: at,
            guild_hidden: Some(true),
            guild_create_time: Some(at),
            guild_limited_time_quantity: Some(3),
            role_amount: None,
            role_guild_id: None,
        };

        let resolved = PurchaseWithRelations::from(row);
        assert_eq!(resolved.purchase.id, 7);
        assert_eq!(resolved.guild.as_ref().map(|g| g.hidden), Some(true));
        assert!(resolved.role.is_none());
        assert!(ExpiringPurchase::try_from(resolved).is_err());
    }

    #[test]
    fn purchase_row_with_both_relations_is_expiring() {
        let at = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let row = PurchaseRow {
            id: 8,
            discord_user_id: "u1".into(),
            guild_id: Some("g1".into()),
            role_id: Some("r1".into()),
            create_time: at,
            expires_at: at,
            guild_hidden: Some(false),
            guild_create_time: Some(at),
            guild_limited_time_quantity: Some(1),
            role_amount: Some("0.25".into()),
            role_guild_id: Some("g1".into()),
        };

        let expiring = ExpiringPurchase::try_from(PurchaseWithRelations::from(row))
            .expect("both relations present");
        assert_eq!(expiring.guild.id, "g1");
        assert_eq!(expiring.role.amount, "0.25");
    }
}
