//! ANAQA Commerce Library
//!
//! This crate provides the commerce engine behind the ANAQA storefront:
//! coupon rule administration, deterministic cart pricing, and order
//! placement with server-authoritative totals.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use config::AppConfig;
use events::EventSender;
use services::{CouponService, OrderService, PricingService};

/// Service bundle handed to the surrounding application's handlers.
#[derive(Clone)]
pub struct AppServices {
    pub coupons: Arc<CouponService>,
    pub pricing: Arc<PricingService>,
    pub orders: Arc<OrderService>,
}

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub services: AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        let services = AppServices {
            coupons: Arc::new(CouponService::new(db.clone(), event_sender.clone())),
            pricing: Arc::new(PricingService::new(db.clone())),
            orders: Arc::new(OrderService::new(
                db.clone(),
                event_sender.clone(),
                config.clone(),
            )),
        };

        Self {
            db,
            config,
            event_sender,
            services,
        }
    }

    pub fn coupon_service(&self) -> Arc<CouponService> {
        self.services.coupons.clone()
    }

    pub fn pricing_service(&self) -> Arc<PricingService> {
        self.services.pricing.clone()
    }

    pub fn order_service(&self) -> Arc<OrderService> {
        self.services.orders.clone()
    }
}
