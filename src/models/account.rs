//! Account entity model
//!
//! This module contains the SeaORM entity model for the accounts table.
//! An account is one tenant-scoped authorization to an external marketplace
//! shop; it is the credential row the store and refresher operate on.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Account entity carrying the marketplace credential for one shop
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Unique identifier for the account (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Marketplace-side shop identifier (unique per tenant)
    pub external_id: String,

    /// Display name for the account (optional)
    pub display_name: Option<String>,

    /// Status of the account (active | reauth_required | disconnected)
    pub status: String,

    /// Encrypted access token ciphertext (AES-256-GCM, AAD = account id)
    pub access_token_ciphertext: Option<Vec<u8>>,

    /// Encrypted refresh token ciphertext; doubles as the CAS guard for
    /// concurrent refreshes
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Access token expiry instant
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Reference to the shared signing secret for this shop
    pub signing_key_ref: Option<String>,

    /// Opaque per-account metadata
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    /// Timestamp when the account was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the account was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenant::Entity",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Account status values
pub mod status {
    pub const ACTIVE: &str = "active";
    pub const REAUTH_REQUIRED: &str = "reauth_required";
    pub const DISCONNECTED: &str = "disconnected";
}
