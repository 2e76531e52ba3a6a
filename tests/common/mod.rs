use anaqa_commerce::{
    config::AppConfig,
    db,
    entities::coupon::DiscountType,
    entities::product,
    events,
    services::pricing::{CartLineItem, CategoryRef},
    services::CreateCouponInput,
    AppState,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use std::sync::Arc;
use uuid::Uuid;

/// Helper harness for spinning up an application state backed by an
/// in-memory SQLite database.
pub struct TestApp {
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        cfg.auto_migrate = true;
        // A single connection keeps every query on the same in-memory db.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");

        let (event_sender, receiver) = events::channel(events::DEFAULT_CHANNEL_CAPACITY);
        let event_task = tokio::spawn(events::process_events(receiver));

        let state = AppState::new(Arc::new(pool), Arc::new(cfg), Arc::new(event_sender));

        Self {
            state,
            _event_task: event_task,
        }
    }
}

/// Insert a catalog product and return its model.
#[allow(dead_code)]
pub async fn seed_product(
    app: &TestApp,
    price: Decimal,
    discount_price: Option<Decimal>,
    category_id: Option<Uuid>,
    stock: i32,
) -> product::Model {
    let product_id = Uuid::new_v4();
    product::ActiveModel {
        id: Set(product_id),
        name: Set(format!("Test Product {}", product_id)),
        slug: Set(format!("test-product-{}", product_id)),
        description: Set(None),
        price: Set(price),
        discount_price: Set(discount_price),
        category_id: Set(category_id),
        stock: Set(stock),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed product")
}

/// Cart line built from a seeded product, the way the storefront submits it.
#[allow(dead_code)]
pub fn line_from(product: &product::Model, quantity: i32) -> CartLineItem {
    CartLineItem {
        product_id: Some(product.id),
        category: product.category_id.map(CategoryRef::Id),
        name: Some(product.name.clone()),
        price: product.price,
        discount_price: product.discount_price,
        quantity,
    }
}

/// Anonymous cart line without a persisted product behind it.
#[allow(dead_code)]
pub fn preview_line(price: Decimal, quantity: i32) -> CartLineItem {
    CartLineItem {
        product_id: None,
        category: None,
        name: None,
        price,
        discount_price: None,
        quantity,
    }
}

/// Coupon input with sane defaults; tests override what they exercise.
#[allow(dead_code)]
pub fn coupon_input(
    code: Option<&str>,
    is_automatic: bool,
    discount_type: DiscountType,
    discount_value: Decimal,
) -> CreateCouponInput {
    CreateCouponInput {
        code: code.map(str::to_string),
        description: "Test coupon".to_string(),
        is_automatic,
        discount_type,
        discount_value,
        max_discount: None,
        min_spend: Decimal::ZERO,
        min_quantity: 0,
        valid_until: Utc::now() + Duration::days(30),
        usage_limit: 10_000,
        applicable_categories: vec![],
        applicable_products: vec![],
    }
}
