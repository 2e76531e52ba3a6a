use crate::{
    entities::coupon::{self, DiscountType},
    entities::Coupon,
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Decimal places of the currency's smallest unit.
const MINOR_UNITS: u32 = 2;

fn round_minor(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MINOR_UNITS, RoundingStrategy::MidpointAwayFromZero)
}

/// A category reference on a cart line. Callers pass either the raw id or a
/// populated category object; both resolve to the same id for scope checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryRef {
    Id(Uuid),
    Embedded(CategorySummary),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySummary {
    #[serde(alias = "_id")]
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
}

impl CategoryRef {
    pub fn id(&self) -> Uuid {
        match self {
            CategoryRef::Id(id) => *id,
            CategoryRef::Embedded(category) => category.id,
        }
    }
}

/// One cart line as submitted by the storefront. Transient: constructed
/// fresh per pricing call, never persisted as-is. Field aliases accept the
/// storefront's document-shaped payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLineItem {
    #[serde(default, alias = "_id", alias = "product")]
    pub product_id: Option<Uuid>,

    #[serde(default, alias = "categoryId")]
    pub category: Option<CategoryRef>,

    /// Display snapshot for the order receipt; ignored by pricing.
    #[serde(default)]
    pub name: Option<String>,

    pub price: Decimal,

    #[serde(default, alias = "discountPrice")]
    pub discount_price: Option<Decimal>,

    pub quantity: i32,
}

impl CartLineItem {
    pub fn effective_price(&self) -> Decimal {
        self.discount_price.unwrap_or(self.price)
    }

    pub fn line_total(&self) -> Decimal {
        self.effective_price() * Decimal::from(self.quantity)
    }
}

/// The single winning coupon of a pricing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub description: String,
    pub amount: Decimal,
    pub is_automatic: bool,
}

/// Finalized pricing breakdown. `error` carries the reason a requested
/// manual code did not win; it coexists with an automatic fallback.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PricingResult {
    pub cart_total: Decimal,
    pub discount_total: Decimal,
    pub grand_total: Decimal,
    pub applied_coupon: Option<AppliedCoupon>,
    pub error: Option<String>,
}

/// Evaluate a single rule against a cart snapshot.
///
/// Pure: no I/O, no side effects. Every failed check resolves to a zero
/// discount rather than an error. One malformed or expired rule must not
/// abort pricing of the whole cart.
pub fn rule_discount(
    rule: &coupon::Model,
    items: &[CartLineItem],
    cart_total: Decimal,
    total_quantity: i32,
    now: DateTime<Utc>,
) -> Decimal {
    if !rule.is_active {
        return Decimal::ZERO;
    }
    if now > rule.valid_until {
        return Decimal::ZERO;
    }
    if rule.used_count >= rule.usage_limit {
        return Decimal::ZERO;
    }
    if cart_total < rule.min_spend {
        return Decimal::ZERO;
    }
    if total_quantity < rule.min_quantity {
        return Decimal::ZERO;
    }

    // Scope: restrict the discountable amount to matching lines. Ids are
    // normalized here, so populated and unpopulated references compare equal.
    let categories: HashSet<Uuid> = rule.category_scope().into_iter().collect();
    let products: HashSet<Uuid> = rule.product_scope().into_iter().collect();

    let eligible_amount = if categories.is_empty() && products.is_empty() {
        cart_total
    } else {
        let eligible: Vec<&CartLineItem> = items
            .iter()
            .filter(|item| {
                let in_categories = item
                    .category
                    .as_ref()
                    .map_or(false, |c| categories.contains(&c.id()));
                let in_products = item
                    .product_id
                    .map_or(false, |id| products.contains(&id));
                in_categories || in_products
            })
            .collect();
        if eligible.is_empty() {
            return Decimal::ZERO;
        }
        eligible.iter().map(|item| item.line_total()).sum()
    };

    let value = match rule.discount_type {
        DiscountType::Percentage => {
            let raw = eligible_amount * rule.discount_value / Decimal::from(100);
            match rule.max_discount {
                Some(cap) if raw > cap => cap,
                _ => raw,
            }
        }
        // Flat amount is not clamped against the eligible amount; the
        // overall discount is clamped against the cart total downstream.
        DiscountType::Fixed => rule.discount_value,
    };

    round_minor(value).max(Decimal::ZERO)
}

/// Manual-code lookup outcome fed into winner selection.
pub(crate) struct ManualCandidate<'a> {
    pub requested_code: &'a str,
    pub rule: Option<&'a coupon::Model>,
    pub amount: Decimal,
}

/// Winner-selection policy: a valid manual code always beats any automatic
/// rule; otherwise the best automatic rule applies and the manual failure
/// is reported alongside it.
pub(crate) fn select_winner(
    manual: Option<ManualCandidate<'_>>,
    best_automatic: Option<(&coupon::Model, Decimal)>,
) -> (Option<AppliedCoupon>, Option<String>) {
    let automatic = |pair: (&coupon::Model, Decimal)| AppliedCoupon {
        code: pair.0.code.clone(),
        description: pair.0.description.clone(),
        amount: pair.1,
        is_automatic: true,
    };

    match manual {
        Some(candidate) => match candidate.rule {
            Some(rule) if candidate.amount > Decimal::ZERO => (
                Some(AppliedCoupon {
                    code: rule.code.clone(),
                    description: rule.description.clone(),
                    amount: candidate.amount,
                    is_automatic: false,
                }),
                None,
            ),
            Some(_) => (
                best_automatic.map(automatic),
                Some(format!(
                    "Requirements not met for {}",
                    candidate.requested_code
                )),
            ),
            None => (
                best_automatic.map(automatic),
                Some("Invalid Coupon Code".to_string()),
            ),
        },
        None => (best_automatic.map(automatic), None),
    }
}

/// Cart pricing orchestrator: fetches candidate rules, scores them through
/// [`rule_discount`], applies winner selection, and returns the finalized
/// breakdown. Read-only; usage counters move only at order placement.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Price a cart, optionally attempting a manual coupon code first.
    ///
    /// Never fails on business-rule mismatches; only the rule lookups can
    /// error, and that propagates as a collaborator failure.
    #[instrument(skip(self, items))]
    pub async fn calculate_cart(
        &self,
        items: &[CartLineItem],
        manual_code: Option<&str>,
    ) -> Result<PricingResult, ServiceError> {
        let mut result = PricingResult::default();

        if items.is_empty() {
            return Ok(result);
        }

        for item in items {
            if item.quantity < 1 {
                return Err(ServiceError::InvalidInput(
                    "line item quantity must be at least 1".to_string(),
                ));
            }
            if item.price < Decimal::ZERO
                || item.discount_price.map_or(false, |p| p < Decimal::ZERO)
            {
                return Err(ServiceError::InvalidInput(
                    "line item price must not be negative".to_string(),
                ));
            }
        }

        result.cart_total = items.iter().map(CartLineItem::line_total).sum();
        let total_quantity: i32 = items.iter().map(|item| item.quantity).sum();
        let now = Utc::now();

        // Newest first, so equal automatic discounts resolve to the newest
        // rule instead of undefined fetch order.
        let automatic_rules = Coupon::find()
            .filter(coupon::Column::IsAutomatic.eq(true))
            .filter(coupon::Column::IsActive.eq(true))
            .order_by_desc(coupon::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut best_automatic: Option<(&coupon::Model, Decimal)> = None;
        for rule in &automatic_rules {
            let amount = rule_discount(rule, items, result.cart_total, total_quantity, now);
            if amount > best_automatic.map_or(Decimal::ZERO, |(_, best)| best) {
                best_automatic = Some((rule, amount));
            }
        }

        let requested = manual_code.map(str::trim).filter(|code| !code.is_empty());
        let (applied, error) = match requested {
            Some(code) => {
                let manual_rule = Coupon::find()
                    .filter(coupon::Column::Code.eq(code.to_uppercase()))
                    .filter(coupon::Column::IsActive.eq(true))
                    .filter(coupon::Column::IsAutomatic.eq(false))
                    .one(&*self.db)
                    .await?;

                let amount = manual_rule.as_ref().map_or(Decimal::ZERO, |rule| {
                    rule_discount(rule, items, result.cart_total, total_quantity, now)
                });

                select_winner(
                    Some(ManualCandidate {
                        requested_code: code,
                        rule: manual_rule.as_ref(),
                        amount,
                    }),
                    best_automatic,
                )
            }
            None => select_winner(None, best_automatic),
        };

        if let Some(applied) = &applied {
            debug!(
                code = %applied.code,
                amount = %applied.amount,
                is_automatic = applied.is_automatic,
                "coupon applied"
            );
            result.discount_total = applied.amount;
        }
        result.applied_coupon = applied;
        result.error = error;

        // A cart can never go negative.
        if result.discount_total > result.cart_total {
            result.discount_total = result.cart_total;
        }
        result.grand_total = result.cart_total - result.discount_total;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn rule(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "TEST".to_string(),
            description: "Test rule".to_string(),
            is_automatic: true,
            is_active: true,
            discount_type,
            discount_value: value,
            max_discount: None,
            min_spend: Decimal::ZERO,
            min_quantity: 0,
            valid_until: Utc::now() + Duration::days(30),
            usage_limit: 10_000,
            used_count: 0,
            applicable_categories: serde_json::json!([]),
            applicable_products: serde_json::json!([]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(price: Decimal, quantity: i32) -> CartLineItem {
        CartLineItem {
            product_id: Some(Uuid::new_v4()),
            category: None,
            name: None,
            price,
            discount_price: None,
            quantity,
        }
    }

    fn totals(items: &[CartLineItem]) -> (Decimal, i32) {
        (
            items.iter().map(CartLineItem::line_total).sum(),
            items.iter().map(|item| item.quantity).sum(),
        )
    }

    // ==================== Limit Checks ====================

    #[test]
    fn test_inactive_rule_contributes_nothing() {
        let mut r = rule(DiscountType::Percentage, dec!(10));
        r.is_active = false;
        let items = vec![line(dec!(1000), 2)];
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(0));
    }

    #[test]
    fn test_expired_rule_contributes_nothing() {
        let mut r = rule(DiscountType::Percentage, dec!(10));
        r.valid_until = Utc::now() - Duration::days(1);
        let items = vec![line(dec!(1000), 2)];
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(0));
    }

    #[test]
    fn test_exhausted_rule_contributes_nothing() {
        let mut r = rule(DiscountType::Fixed, dec!(100));
        r.usage_limit = 5;
        r.used_count = 5;
        let items = vec![line(dec!(1000), 2)];
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(0));
    }

    #[test]
    fn test_min_spend_not_reached() {
        let mut r = rule(DiscountType::Percentage, dec!(10));
        r.min_spend = dec!(5000);
        let items = vec![line(dec!(1000), 2)];
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(0));
    }

    #[test]
    fn test_min_quantity_not_reached() {
        let mut r = rule(DiscountType::Percentage, dec!(10));
        r.min_quantity = 3;
        let items = vec![line(dec!(1000), 2)];
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(0));
    }

    // ==================== Amount Computation ====================

    #[test]
    fn test_unrestricted_percentage() {
        let r = rule(DiscountType::Percentage, dec!(10));
        let items = vec![line(dec!(1000), 2)];
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(200));
    }

    #[test]
    fn test_percentage_capped_by_max_discount() {
        let mut r = rule(DiscountType::Percentage, dec!(50));
        r.max_discount = Some(dec!(100));
        let items = vec![line(dec!(500), 2)]; // eligible amount 1000
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(100));
    }

    #[test]
    fn test_fixed_amount_not_clamped_here() {
        let r = rule(DiscountType::Fixed, dec!(5000));
        let items = vec![line(dec!(1000), 2)];
        let (total, qty) = totals(&items);

        // Clamping against the cart total happens in the pricer, not here.
        assert_eq!(
            rule_discount(&r, &items, total, qty, Utc::now()),
            dec!(5000)
        );
    }

    #[test]
    fn test_negative_discount_value_floors_at_zero() {
        let r = rule(DiscountType::Fixed, dec!(-50));
        let items = vec![line(dec!(1000), 1)];
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(0));
    }

    #[test]
    fn test_rounds_to_minor_units() {
        let r = rule(DiscountType::Percentage, dec!(10));
        let items = vec![line(dec!(99.99), 1)];
        let (total, qty) = totals(&items);

        // 9.999 rounds midpoint-away-from-zero to 10.00
        assert_eq!(
            rule_discount(&r, &items, total, qty, Utc::now()),
            dec!(10.00)
        );
    }

    #[test]
    fn test_discount_price_wins_over_price() {
        let r = rule(DiscountType::Percentage, dec!(10));
        let mut item = line(dec!(1000), 2);
        item.discount_price = Some(dec!(800));
        let items = vec![item];
        let (total, qty) = totals(&items);

        assert_eq!(total, dec!(1600));
        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(160));
    }

    // ==================== Scope Resolution ====================

    #[test]
    fn test_category_scope_mismatch_rejects() {
        let mut r = rule(DiscountType::Percentage, dec!(10));
        r.applicable_categories = serde_json::json!([Uuid::new_v4()]);
        let mut item = line(dec!(1000), 2);
        item.category = Some(CategoryRef::Id(Uuid::new_v4()));
        let items = vec![item];
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(0));
    }

    #[test]
    fn test_category_scope_discounts_eligible_lines_only() {
        let category_id = Uuid::new_v4();
        let mut r = rule(DiscountType::Percentage, dec!(10));
        r.applicable_categories = serde_json::json!([category_id]);

        let mut eligible = line(dec!(1000), 1);
        eligible.category = Some(CategoryRef::Id(category_id));
        let other = line(dec!(9000), 1);
        let items = vec![eligible, other];
        let (total, qty) = totals(&items);

        // 10% of the eligible 1000, not of the 10000 cart.
        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(100));
    }

    #[test]
    fn test_embedded_category_reference_matches() {
        let category_id = Uuid::new_v4();
        let mut r = rule(DiscountType::Percentage, dec!(10));
        r.applicable_categories = serde_json::json!([category_id]);

        let mut item = line(dec!(1000), 1);
        item.category = Some(CategoryRef::Embedded(CategorySummary {
            id: category_id,
            name: Some("Abayas".to_string()),
        }));
        let items = vec![item];
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(100));
    }

    #[test]
    fn test_product_scope_matches_by_product_id() {
        let product_id = Uuid::new_v4();
        let mut r = rule(DiscountType::Fixed, dec!(50));
        r.applicable_products = serde_json::json!([product_id]);

        let mut item = line(dec!(1000), 1);
        item.product_id = Some(product_id);
        let items = vec![item, line(dec!(500), 1)];
        let (total, qty) = totals(&items);

        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(50));
    }

    #[test]
    fn test_min_spend_checked_against_full_cart_total() {
        let category_id = Uuid::new_v4();
        let mut r = rule(DiscountType::Percentage, dec!(10));
        r.applicable_categories = serde_json::json!([category_id]);
        r.min_spend = dec!(1500);

        let mut eligible = line(dec!(1000), 1);
        eligible.category = Some(CategoryRef::Id(category_id));
        let items = vec![eligible, line(dec!(1000), 1)];
        let (total, qty) = totals(&items);

        // Cart total 2000 satisfies min_spend even though eligible is 1000.
        assert_eq!(rule_discount(&r, &items, total, qty, Utc::now()), dec!(100));
    }

    // ==================== Winner Selection ====================

    #[test]
    fn test_valid_manual_beats_larger_automatic() {
        let mut manual_rule = rule(DiscountType::Fixed, dec!(50));
        manual_rule.is_automatic = false;
        manual_rule.code = "SAVE50".to_string();
        let auto_rule = rule(DiscountType::Fixed, dec!(500));

        let (applied, error) = select_winner(
            Some(ManualCandidate {
                requested_code: "SAVE50",
                rule: Some(&manual_rule),
                amount: dec!(50),
            }),
            Some((&auto_rule, dec!(500))),
        );

        let applied = applied.expect("manual coupon should win");
        assert!(!applied.is_automatic);
        assert_eq!(applied.code, "SAVE50");
        assert_eq!(applied.amount, dec!(50));
        assert!(error.is_none());
    }

    #[test]
    fn test_unmet_manual_reports_error_and_falls_back() {
        let mut manual_rule = rule(DiscountType::Fixed, dec!(50));
        manual_rule.is_automatic = false;
        let auto_rule = rule(DiscountType::Fixed, dec!(75));

        let (applied, error) = select_winner(
            Some(ManualCandidate {
                requested_code: "SAVE50",
                rule: Some(&manual_rule),
                amount: Decimal::ZERO,
            }),
            Some((&auto_rule, dec!(75))),
        );

        let applied = applied.expect("automatic fallback expected");
        assert!(applied.is_automatic);
        assert_eq!(applied.amount, dec!(75));
        assert_eq!(error.as_deref(), Some("Requirements not met for SAVE50"));
    }

    #[test]
    fn test_unknown_code_reports_error_and_falls_back() {
        let auto_rule = rule(DiscountType::Percentage, dec!(10));

        let (applied, error) = select_winner(
            Some(ManualCandidate {
                requested_code: "NOPE",
                rule: None,
                amount: Decimal::ZERO,
            }),
            Some((&auto_rule, dec!(20))),
        );

        assert!(applied.expect("fallback").is_automatic);
        assert_eq!(error.as_deref(), Some("Invalid Coupon Code"));
    }

    #[test]
    fn test_unknown_code_without_automatic_fallback() {
        let (applied, error) = select_winner(
            Some(ManualCandidate {
                requested_code: "NOPE",
                rule: None,
                amount: Decimal::ZERO,
            }),
            None,
        );

        assert!(applied.is_none());
        assert_eq!(error.as_deref(), Some("Invalid Coupon Code"));
    }

    #[test]
    fn test_no_code_applies_best_automatic() {
        let auto_rule = rule(DiscountType::Percentage, dec!(10));

        let (applied, error) = select_winner(None, Some((&auto_rule, dec!(20))));

        let applied = applied.expect("automatic rule should apply");
        assert!(applied.is_automatic);
        assert!(error.is_none());
    }

    // ==================== Line Item Parsing ====================

    #[test]
    fn test_accepts_storefront_document_shape() {
        let category_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "_id": Uuid::new_v4(),
            "category": { "_id": category_id, "name": "Hijabs" },
            "price": "1200",
            "discountPrice": "999",
            "quantity": 2
        });

        let item: CartLineItem = serde_json::from_value(payload).unwrap();
        assert_eq!(item.category.as_ref().unwrap().id(), category_id);
        assert_eq!(item.effective_price(), dec!(999));
        assert_eq!(item.line_total(), dec!(1998));
    }

    #[test]
    fn test_accepts_raw_category_id() {
        let category_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "category": category_id,
            "price": 500,
            "quantity": 1
        });

        let item: CartLineItem = serde_json::from_value(payload).unwrap();
        assert_eq!(item.category.as_ref().unwrap().id(), category_id);
        assert!(item.product_id.is_none());
    }
}
