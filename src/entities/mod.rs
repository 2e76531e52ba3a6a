/// Persisted entities
pub mod coupon;
pub mod coupon_redemption;
pub mod order;
pub mod order_item;
pub mod product;

// Re-export entities
pub use coupon::{DiscountType, Entity as Coupon, Model as CouponModel};
pub use coupon_redemption::{Entity as CouponRedemption, Model as CouponRedemptionModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, ShippingMethod};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
