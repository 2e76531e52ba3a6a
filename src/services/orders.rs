use crate::{
    config::AppConfig,
    entities::order::{self, OrderStatus, ShippingMethod},
    entities::{order_item, product, Order, OrderItem, Product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::CouponService,
    services::pricing::{CartLineItem, PricingService},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Bound on redemption-claim retries. Every failed claim means a rule just
/// exhausted its limit, so the candidate set shrinks each round.
const MAX_REDEMPTION_ATTEMPTS: usize = 8;

/// Shipping destination captured at checkout. `method` decides the flat
/// surcharge tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub full_name: String,
    pub phone: String,
    pub address_line: String,
    pub city: String,
    pub method: ShippingMethod,
}

/// Input for placing an order. Deliberately carries no totals: the server
/// recomputes everything from the items and coupon code.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderInput {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<CartLineItem>,

    #[serde(default)]
    pub coupon_code: Option<String>,

    #[serde(default)]
    pub user_id: Option<Uuid>,

    #[serde(default)]
    pub user_email: Option<String>,

    pub shipping_address: ShippingAddress,
}

/// Order with its line snapshot
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

fn shipping_rate(config: &AppConfig, method: &ShippingMethod) -> Decimal {
    match method {
        ShippingMethod::Domestic => config.shipping.domestic_rate,
        ShippingMethod::International => config.shipping.international_rate,
    }
}

/// Order placement and management.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    pricing: PricingService,
    coupons: CouponService,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            pricing: PricingService::new(db.clone()),
            coupons: CouponService::new(db.clone(), event_sender.clone()),
            db,
            event_sender,
            config,
        }
    }

    /// Places an order.
    ///
    /// Pricing is recomputed server-side from the submitted items and coupon
    /// code; the order row, its line items, the stock movement, and the
    /// coupon redemption claim commit in a single transaction. A lost claim
    /// rolls everything back and re-prices against fresh rule state, so a
    /// capped coupon is never oversold and checkout is never blocked by one.
    #[instrument(skip(self, input))]
    pub async fn create_order(&self, input: CreateOrderInput) -> Result<order::Model, ServiceError> {
        input.validate()?;

        let shipping_total = shipping_rate(&self.config, &input.shipping_address.method);

        for _attempt in 0..MAX_REDEMPTION_ATTEMPTS {
            let pricing = self
                .pricing
                .calculate_cart(&input.items, input.coupon_code.as_deref())
                .await?;

            let txn = self.db.begin().await?;

            let order_id = Uuid::new_v4();
            let count = Order::find().count(&txn).await?;
            let order_number = format!("ANQ-{}", 1000 + count + 1);

            let order = order::ActiveModel {
                id: Set(order_id),
                order_number: Set(order_number.clone()),
                user_id: Set(input.user_id),
                user_email: Set(input.user_email.clone()),
                status: Set(OrderStatus::Pending),
                subtotal: Set(pricing.cart_total),
                discount_total: Set(pricing.discount_total),
                coupon_code: Set(pricing.applied_coupon.as_ref().map(|c| c.code.clone())),
                shipping_total: Set(shipping_total),
                total_amount: Set(pricing.grand_total + shipping_total),
                shipping_method: Set(input.shipping_address.method.clone()),
                shipping_address: Set(serde_json::to_string(&input.shipping_address).ok()),
                created_at: Set(Utc::now()),
                updated_at: Set(Some(Utc::now())),
            };
            let order = order.insert(&txn).await?;

            for item in &input.items {
                order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order_id),
                    product_id: Set(item.product_id),
                    name: Set(item
                        .name
                        .clone()
                        .unwrap_or_else(|| "Unnamed item".to_string())),
                    unit_price: Set(item.effective_price()),
                    quantity: Set(item.quantity),
                    line_total: Set(item.line_total()),
                }
                .insert(&txn)
                .await?;

                if let Some(product_id) = item.product_id {
                    Product::update_many()
                        .col_expr(
                            product::Column::Stock,
                            Expr::col(product::Column::Stock).sub(item.quantity),
                        )
                        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(product::Column::Id.eq(product_id))
                        .exec(&txn)
                        .await?;
                }
            }

            let redeemed = match &pricing.applied_coupon {
                Some(applied) => {
                    match self
                        .coupons
                        .redeem(&txn, &applied.code, input.user_id, order_id)
                        .await?
                    {
                        Some(coupon) => Some(coupon),
                        None => {
                            // Lost the race for the last redemption; drop
                            // the partial order and re-price fresh.
                            txn.rollback().await?;
                            continue;
                        }
                    }
                }
                None => None,
            };

            txn.commit().await?;

            if let Some(coupon) = redeemed {
                self.event_sender
                    .send_or_log(Event::CouponRedeemed {
                        coupon_id: coupon.id,
                        order_id,
                    })
                    .await;
            }
            self.event_sender
                .send_or_log(Event::OrderCreated(order_id))
                .await;

            info!(
                "Created order {} ({}), total {}",
                order_number, order_id, order.total_amount
            );
            return Ok(order);
        }

        Err(ServiceError::Conflict(
            "Could not settle coupon redemption after repeated attempts".to_string(),
        ))
    }

    /// Retrieves an order with its line snapshot.
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order.find_related(OrderItem).all(&*self.db).await?;

        Ok(OrderWithItems { order, items })
    }

    /// All orders, newest first, paginated. Admin listing.
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = Order::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((data, total))
    }

    /// Orders belonging to one customer, newest first.
    pub async fn get_user_orders(&self, user_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::UserId.eq(Some(user_id)))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status.clone();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status.clone());
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: format!("{:?}", old_status),
                new_status: format!("{:?}", new_status),
            })
            .await;

        Ok(updated)
    }
}
