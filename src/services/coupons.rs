use crate::{
    entities::coupon::{self, DiscountType},
    entities::{coupon_redemption, Coupon},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Redemption cap applied when the administrator leaves the field empty.
const DEFAULT_USAGE_LIMIT: i32 = 10_000;

fn default_usage_limit() -> i32 {
    DEFAULT_USAGE_LIMIT
}

/// Input for creating a coupon rule
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_coupon_rules"))]
pub struct CreateCouponInput {
    /// Optional for automatic rules (a system code is generated), required
    /// for manual rules. Normalized to uppercase.
    #[serde(default)]
    pub code: Option<String>,

    #[validate(length(min = 1, max = 200))]
    pub description: String,

    #[serde(default)]
    pub is_automatic: bool,

    pub discount_type: DiscountType,
    pub discount_value: Decimal,

    #[serde(default)]
    pub max_discount: Option<Decimal>,

    #[serde(default)]
    pub min_spend: Decimal,

    #[serde(default)]
    pub min_quantity: i32,

    pub valid_until: DateTime<Utc>,

    #[serde(default = "default_usage_limit")]
    pub usage_limit: i32,

    #[serde(default)]
    pub applicable_categories: Vec<Uuid>,

    #[serde(default)]
    pub applicable_products: Vec<Uuid>,
}

fn validate_coupon_rules(input: &CreateCouponInput) -> Result<(), ValidationError> {
    if input.discount_value <= Decimal::ZERO {
        return Err(ValidationError::new("discount_value_not_positive"));
    }
    if input.discount_type == DiscountType::Percentage
        && input.discount_value > Decimal::from(100)
    {
        return Err(ValidationError::new("percentage_over_100"));
    }
    if input.max_discount.map_or(false, |cap| cap <= Decimal::ZERO) {
        return Err(ValidationError::new("max_discount_not_positive"));
    }
    if input.min_spend < Decimal::ZERO {
        return Err(ValidationError::new("min_spend_negative"));
    }
    if input.min_quantity < 0 {
        return Err(ValidationError::new("min_quantity_negative"));
    }
    if input.usage_limit < 1 {
        return Err(ValidationError::new("usage_limit_below_one"));
    }
    Ok(())
}

/// Partial update of a coupon rule
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCouponInput {
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub discount_value: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub min_spend: Option<Decimal>,
    pub min_quantity: Option<i32>,
    pub valid_until: Option<DateTime<Utc>>,
    pub usage_limit: Option<i32>,
    pub applicable_categories: Option<Vec<Uuid>>,
    pub applicable_products: Option<Vec<Uuid>>,
}

fn generate_auto_code() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("AUTO-{}", suffix.to_uppercase())
}

/// Administration and redemption bookkeeping for coupon rules. Pricing
/// itself never goes through this service; it reads rules directly and
/// leaves `used_count` untouched.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a coupon rule. Automatic rules without an explicit code get
    /// a generated `AUTO-` code; manual rules must supply one.
    #[instrument(skip(self, input))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        input.validate()?;

        let code = match input.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => code.to_uppercase(),
            None if input.is_automatic => generate_auto_code(),
            None => {
                return Err(ServiceError::ValidationError(
                    "Manual coupons require a code".to_string(),
                ))
            }
        };

        let existing = Coupon::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let coupon_id = Uuid::new_v4();
        let model = coupon::ActiveModel {
            id: Set(coupon_id),
            code: Set(code),
            description: Set(input.description),
            is_automatic: Set(input.is_automatic),
            is_active: Set(true),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            max_discount: Set(input.max_discount),
            min_spend: Set(input.min_spend),
            min_quantity: Set(input.min_quantity),
            valid_until: Set(input.valid_until),
            usage_limit: Set(input.usage_limit),
            used_count: Set(0),
            applicable_categories: Set(serde_json::json!(input.applicable_categories)),
            applicable_products: Set(serde_json::json!(input.applicable_products)),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };

        let created = model.insert(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CouponCreated(coupon_id))
            .await;

        info!("Created coupon {} ({})", created.code, coupon_id);
        Ok(created)
    }

    /// Partial update of an existing rule.
    #[instrument(skip(self, input))]
    pub async fn update_coupon(
        &self,
        coupon_id: Uuid,
        input: UpdateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        let existing = self.get_coupon(coupon_id).await?;

        if let Some(value) = input.discount_value {
            if value <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "discount_value must be positive".to_string(),
                ));
            }
            if existing.discount_type == DiscountType::Percentage && value > Decimal::from(100) {
                return Err(ServiceError::ValidationError(
                    "percentage discount cannot exceed 100".to_string(),
                ));
            }
        }

        let mut active: coupon::ActiveModel = existing.into();
        if let Some(description) = input.description {
            active.description = Set(description);
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(value) = input.discount_value {
            active.discount_value = Set(value);
        }
        if let Some(cap) = input.max_discount {
            active.max_discount = Set(Some(cap));
        }
        if let Some(min_spend) = input.min_spend {
            active.min_spend = Set(min_spend);
        }
        if let Some(min_quantity) = input.min_quantity {
            active.min_quantity = Set(min_quantity);
        }
        if let Some(valid_until) = input.valid_until {
            active.valid_until = Set(valid_until);
        }
        if let Some(usage_limit) = input.usage_limit {
            active.usage_limit = Set(usage_limit);
        }
        if let Some(categories) = input.applicable_categories {
            active.applicable_categories = Set(serde_json::json!(categories));
        }
        if let Some(products) = input.applicable_products {
            active.applicable_products = Set(serde_json::json!(products));
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CouponUpdated(coupon_id))
            .await;

        Ok(updated)
    }

    /// All coupons, newest first.
    pub async fn list_coupons(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        Ok(Coupon::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn get_coupon(&self, coupon_id: Uuid) -> Result<coupon::Model, ServiceError> {
        Coupon::find_by_id(coupon_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))
    }

    #[instrument(skip(self))]
    pub async fn delete_coupon(&self, coupon_id: Uuid) -> Result<(), ServiceError> {
        let result = Coupon::delete_by_id(coupon_id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Coupon {} not found",
                coupon_id
            )));
        }

        self.event_sender
            .send_or_log(Event::CouponDeleted(coupon_id))
            .await;

        info!("Deleted coupon {}", coupon_id);
        Ok(())
    }

    /// Claim one redemption of a coupon, atomically: the counter moves only
    /// while `used_count < usage_limit`, so concurrent order placements
    /// cannot oversell a capped rule. Returns the coupon when the claim
    /// succeeded, `None` when the rule is no longer redeemable.
    ///
    /// Runs on the caller's connection so the claim and the order insert
    /// commit or roll back together.
    #[instrument(skip(self, conn))]
    pub async fn redeem<C>(
        &self,
        conn: &C,
        code: &str,
        user_id: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<Option<coupon::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        let claimed = Coupon::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Code.eq(code))
            .filter(Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::UsageLimit)))
            .exec(conn)
            .await?;

        if claimed.rows_affected == 0 {
            warn!("Coupon {} could not be claimed, usage limit reached", code);
            return Ok(None);
        }

        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))?;

        coupon_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon.id),
            user_id: Set(user_id),
            order_id: Set(order_id),
            redeemed_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        Ok(Some(coupon))
    }
}
