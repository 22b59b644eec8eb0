use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog entry for a digital book.
///
/// `file_url` is the storage pointer for the purchasable file; products
/// without one (e.g. a preorder placeholder) are sold but yield no download
/// link at fulfillment time.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub sku: String,
    pub title: String,
    pub author: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price: Decimal,
    pub currency: String,
    #[sea_orm(nullable)]
    pub file_url: Option<String>,
    #[sea_orm(nullable)]
    pub file_name: Option<String>,
    #[sea_orm(nullable)]
    pub file_size_bytes: Option<i64>,
    /// Per-product policy copied onto every minted download link.
    pub max_downloads: i32,
    /// Aggregate counter across all links for this product.
    pub download_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::download_link::Entity")]
    DownloadLinks,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::download_link::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DownloadLinks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
