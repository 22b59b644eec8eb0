pub mod audit_log;
pub mod coupon;
pub mod download_link;
pub mod order;
pub mod order_item;
pub mod product;

pub use audit_log::Entity as AuditLog;
pub use coupon::Entity as Coupon;
pub use download_link::Entity as DownloadLink;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;
