// Coupon administration and redemption bookkeeping
pub mod coupons;

// Order placement and management
pub mod orders;

// The pricing engine: rule evaluation and cart calculation
pub mod pricing;

pub use coupons::{CouponService, CreateCouponInput, UpdateCouponInput};
pub use orders::{CreateOrderInput, OrderService, OrderWithItems, ShippingAddress};
pub use pricing::{
    AppliedCoupon, CartLineItem, CategoryRef, PricingResult, PricingService,
};
