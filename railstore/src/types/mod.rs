//! Domain types stored in reservation tables.

mod order_status;

pub use order_status::OrderStatus;
