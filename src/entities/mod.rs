pub mod notification_preference;
pub mod order;
pub mod order_item;
