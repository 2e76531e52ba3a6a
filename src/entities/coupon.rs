use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

/// A coupon rule. Automatic rules are evaluated against every cart; manual
/// rules require the shopper to supply the matching code. `used_count` is
/// mutated only through the conditional redemption claim at order creation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Stored uppercase; lookups uppercase their input.
    #[sea_orm(unique)]
    pub code: String,

    pub description: String,
    pub is_automatic: bool,
    pub is_active: bool,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub min_spend: Decimal,
    pub min_quantity: i32,
    pub valid_until: DateTime<Utc>,
    pub usage_limit: i32,
    pub used_count: i32,

    /// Category ids this rule is restricted to; empty array = unrestricted.
    #[sea_orm(column_type = "Json")]
    pub applicable_categories: Json,

    /// Product ids this rule is restricted to; empty array = unrestricted.
    #[sea_orm(column_type = "Json")]
    pub applicable_products: Json,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_redemption::Entity")]
    Redemptions,
}

impl Related<super::coupon_redemption::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Category scope as typed ids. Ill-formed entries deserialize to an
    /// empty set, which reads as "unrestricted"; scope data is written by
    /// `CouponService` and is always a string array.
    pub fn category_scope(&self) -> Vec<Uuid> {
        serde_json::from_value(self.applicable_categories.clone()).unwrap_or_default()
    }

    /// Product scope as typed ids.
    pub fn product_scope(&self) -> Vec<Uuid> {
        serde_json::from_value(self.applicable_products.clone()).unwrap_or_default()
    }
}
