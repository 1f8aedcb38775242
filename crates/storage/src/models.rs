use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Decimal places an amount is rounded to before trailing zeros are stripped.
pub const AMOUNT_PRECISION: u32 = 5;

// ─── Guild ──────────────────────────────────────────────────────────────────

/// A Discord server that sells roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Guild {
    pub id: String,
    pub hidden: bool,
    pub create_time: DateTime<Utc>,
    pub limited_time_quantity: i32,
}

/// Insert-ready guild with the roles it is created with.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGuild {
    pub id: String,
    #[serde(default)]
    pub hidden: bool,
    /// Defaults to the insertion time when absent.
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default = "default_limited_time_quantity")]
    pub limited_time_quantity: i32,
    #[serde(default)]
    pub roles: Vec<NewRole>,
}

fn default_limited_time_quantity() -> i32 {
    1
}

/// Partial guild update. Absent scalar fields keep their stored value.
///
/// A non-empty `roles` list replaces the guild's role set; an empty one
/// leaves the roles alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildUpdate {
    pub hidden: Option<bool>,
    pub limited_time_quantity: Option<i32>,
    #[serde(default)]
    pub roles: Vec<NewRole>,
}

// ─── Role ───────────────────────────────────────────────────────────────────

/// A purchasable role. `amount` is the NUMERIC column rendered as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub amount: String,
    pub guild_id: String,
}

/// Role as supplied by callers; the owning guild comes from context.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewRole {
    pub id: String,
    pub amount: String,
}

// ─── Guild View ─────────────────────────────────────────────────────────────

/// A guild with its roles, formatted for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildView {
    pub id: String,
    pub hidden: bool,
    pub create_time: DateTime<Utc>,
    pub limited_time_quantity: String,
    pub roles: Vec<RoleView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleView {
    pub id: String,
    pub amount: String,
}

impl GuildView {
    /// Build the display view. `roles` must already be ordered by amount.
    pub fn new(guild: Guild, roles: Vec<Role>) -> Self {
        Self {
            id: guild.id,
            hidden: guild.hidden,
            create_time: guild.create_time,
            limited_time_quantity: guild.limited_time_quantity.to_string(),
            roles: roles
                .into_iter()
                .map(|role| RoleView {
                    amount: format_amount(&role.amount),
                    id: role.id,
                })
                .collect(),
        }
    }
}

/// Round to [`AMOUNT_PRECISION`] places, halves away from zero, then drop
/// trailing zeros and a dangling decimal point: `1.50000` → `1.5`,
/// `2.00000` → `2`, `0.015625` → `0.01563`.
///
/// Rounding works on the exact binary value of the parsed `f64`. Text that
/// does not parse as a finite number is returned unchanged.
pub fn format_amount(raw: &str) -> String {
    let Some(value) = raw
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(Decimal::from_f64_retain)
    else {
        return raw.to_string();
    };

    value
        .round_dp_with_strategy(AMOUNT_PRECISION, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
        .to_string()
}

// ─── AccessToken ────────────────────────────────────────────────────────────

/// OAuth code handed out on session exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

// ─── RolePurchase ───────────────────────────────────────────────────────────

/// A paid, time-bounded role grant.
///
/// `guild_id` and `role_id` become `None` when the referenced row is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RolePurchase {
    pub id: i64,
    pub discord_user_id: String,
    pub guild_id: Option<String>,
    pub role_id: Option<String>,
    pub create_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Insert-ready purchase (no `id` or `create_time`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRolePurchase {
    pub discord_user_id: String,
    pub guild_id: String,
    pub role_id: String,
    pub expires_at: DateTime<Utc>,
}

/// A purchase with its guild and role resolved, if they still exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseWithRelations {
    #[serde(flatten)]
    pub purchase: RolePurchase,
    pub guild: Option<Guild>,
    pub role: Option<Role>,
}

/// A purchase nearing expiry. Both relations are guaranteed present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringPurchase {
    #[serde(flatten)]
    pub purchase: RolePurchase,
    pub guild: Guild,
    pub role: Role,
}

impl TryFrom<PurchaseWithRelations> for ExpiringPurchase {
    type Error = PurchaseWithRelations;

    fn try_from(value: PurchaseWithRelations) -> Result<Self, Self::Error> {
        match value {
            PurchaseWithRelations {
                purchase,
                guild: Some(guild),
                role: Some(role),
            } => Ok(Self {
                purchase,
                guild,
                role,
            }),
            other => Err(other),
        }
    }
}

// ─── Wallet ─────────────────────────────────────────────────────────────────

/// An on-chain address registered by a Discord user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: i64,
    pub address: String,
    pub discord_user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn guild() -> Guild {
        Guild {
            id: "g1".into(),
            hidden: false,
            create_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            limited_time_quantity: 30,
        }
    }

    #[test]
    fn format_amount_strips_trailing_zeros() {
        assert_eq!(format_amount("1.50000"), "1.5");
        assert_eq!(format_amount("2.00000"), "2");
        assert_eq!(format_amount("1.23450"), "1.2345");
        assert_eq!(format_amount("10"), "10");
        assert_eq!(format_amount("0.10000"), "0.1");
    }

    #[test]
    fn format_amount_rounds_to_five_places() {
        assert_eq!(format_amount("0.123456"), "0.12346");
        assert_eq!(format_amount("3.000001"), "3");
    }

    #[test]
    fn format_amount_rounds_halves_up() {
        // Exact binary halves at the sixth place.
        assert_eq!(format_amount("0.015625"), "0.01563");
        assert_eq!(format_amount("0.046875"), "0.04688");
        assert_eq!(format_amount("-0.015625"), "-0.01563");
    }

    #[test]
    fn format_amount_leaves_garbage_alone() {
        assert_eq!(format_amount("free"), "free");
    }

    #[test]
    fn guild_view_formats_amounts_and_quantity() {
        let roles = vec![
            Role {
                id: "r1".into(),
                amount: "0.50000".into(),
                guild_id: "g1".into(),
            },
            Role {
                id: "r2".into(),
                amount: "2.00000".into(),
                guild_id: "g1".into(),
            },
        ];

        let view = GuildView::new(guild(), roles);
        assert_eq!(view.limited_time_quantity, "30");
        assert_eq!(
            view.roles,
            vec![
                RoleView {
                    id: "r1".into(),
                    amount: "0.5".into()
                },
                RoleView {
                    id: "r2".into(),
                    amount: "2".into()
                },
            ]
        );
    }

    #[test]
    fn guild_view_is_stable_across_calls() {
        let roles = vec![Role {
            id: "r1".into(),
            amount: "1.23450".into(),
            guild_id: "g1".into(),
        }];
        assert_eq!(
            GuildView::new(guild(), roles.clone()),
            GuildView::new(guild(), roles)
        );
    }

    #[test]
    fn expiring_purchase_requires_both_relations() {
        let purchase = RolePurchase {
            id: 1,
            discord_user_id: "u1".into(),
            guild_id: Some("g1".into()),
            role_id: None,
            create_time: guild().create_time,
            expires_at: guild().create_time,
        };
        let partial = PurchaseWithRelations {
            purchase,
            guild: Some(guild()),
            role: None,
        };
        assert!(ExpiringPurchase::try_from(partial).is_err());
    }
}
