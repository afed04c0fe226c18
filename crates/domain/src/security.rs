use std::fmt::{Display, Formatter};
use std::str::FromStr;

use milagro_core::AppError;
use serde::{Deserialize, Serialize};

/// Capability tags gating one action on one subject domain.
///
/// Every variant except [`Permission::All`] belongs to the catalog and is
/// stored as its `<domain>.<action>` tag. `All` is the wildcard sentinel
/// granted to bootstrap sessions and is never listed in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    /// View platform users.
    #[serde(rename = "users.view")]
    UsersView,
    /// Create platform users.
    #[serde(rename = "users.create")]
    UsersCreate,
    /// Edit platform users.
    #[serde(rename = "users.edit")]
    UsersEdit,
    /// Delete platform users.
    #[serde(rename = "users.delete")]
    UsersDelete,
    /// View the product catalog.
    #[serde(rename = "products.view")]
    ProductsView,
    /// Create products.
    #[serde(rename = "products.create")]
    ProductsCreate,
    /// Edit products.
    #[serde(rename = "products.edit")]
    ProductsEdit,
    /// Delete products.
    #[serde(rename = "products.delete")]
    ProductsDelete,
    /// View orders.
    #[serde(rename = "orders.view")]
    OrdersView,
    /// Move orders through fulfilment.
    #[serde(rename = "orders.process")]
    OrdersProcess,
    /// Edit order contents.
    #[serde(rename = "orders.edit")]
    OrdersEdit,
    /// View stock levels.
    #[serde(rename = "inventory.view")]
    InventoryView,
    /// Adjust stock levels.
    #[serde(rename = "inventory.manage")]
    InventoryManage,
    /// View sample requests.
    #[serde(rename = "samples.view")]
    SamplesView,
    /// Approve and ship sample requests.
    #[serde(rename = "samples.manage")]
    SamplesManage,
    /// View expo listings.
    #[serde(rename = "expo.view")]
    ExpoView,
    /// Manage expo listings.
    #[serde(rename = "expo.manage")]
    ExpoManage,
    /// View payments.
    #[serde(rename = "payments.view")]
    PaymentsView,
    /// Reconcile and refund payments.
    #[serde(rename = "payments.manage")]
    PaymentsManage,
    /// View analytics dashboards.
    #[serde(rename = "analytics.view")]
    AnalyticsView,
    /// View platform settings.
    #[serde(rename = "settings.view")]
    SettingsView,
    /// Change platform settings.
    #[serde(rename = "settings.manage")]
    SettingsManage,
    /// Create, edit and remove administrators.
    #[serde(rename = "admins.manage")]
    AdminsManage,
    /// Wildcard sentinel that satisfies every permission check.
    #[serde(rename = "all")]
    All,
}

const CATALOG: &[Permission] = &[
    Permission::UsersView,
    Permission::UsersCreate,
    Permission::UsersEdit,
    Permission::UsersDelete,
    Permission::ProductsView,
    Permission::ProductsCreate,
    Permission::ProductsEdit,
    Permission::ProductsDelete,
    Permission::OrdersView,
    Permission::OrdersProcess,
    Permission::OrdersEdit,
    Permission::InventoryView,
    Permission::InventoryManage,
    Permission::SamplesView,
    Permission::SamplesManage,
    Permission::ExpoView,
    Permission::ExpoManage,
    Permission::PaymentsView,
    Permission::PaymentsManage,
    Permission::AnalyticsView,
    Permission::SettingsView,
    Permission::SettingsManage,
    Permission::AdminsManage,
];

impl Permission {
    /// Returns a stable storage value for this permission.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsersView => "users.view",
            Self::UsersCreate => "users.create",
            Self::UsersEdit => "users.edit",
            Self::UsersDelete => "users.delete",
            Self::ProductsView => "products.view",
            Self::ProductsCreate => "products.create",
            Self::ProductsEdit => "products.edit",
            Self::ProductsDelete => "products.delete",
            Self::OrdersView => "orders.view",
            Self::OrdersProcess => "orders.process",
            Self::OrdersEdit => "orders.edit",
            Self::InventoryView => "inventory.view",
            Self::InventoryManage => "inventory.manage",
            Self::SamplesView => "samples.view",
            Self::SamplesManage => "samples.manage",
            Self::ExpoView => "expo.view",
            Self::ExpoManage => "expo.manage",
            Self::PaymentsView => "payments.view",
            Self::PaymentsManage => "payments.manage",
            Self::AnalyticsView => "analytics.view",
            Self::SettingsView => "settings.view",
            Self::SettingsManage => "settings.manage",
            Self::AdminsManage => "admins.manage",
            Self::All => "all",
        }
    }

    /// Returns every catalog permission in presentation order.
    ///
    /// The wildcard sentinel is not part of the catalog.
    #[must_use]
    pub fn catalog() -> &'static [Self] {
        CATALOG
    }

    /// Resolves a catalog permission from its subject and action halves.
    ///
    /// Returns `None` for pairs outside the catalog, including the wildcard.
    #[must_use]
    pub fn from_parts(subject: &str, action: &str) -> Option<Self> {
        let tag = format!("{subject}.{action}");
        CATALOG
            .iter()
            .copied()
            .find(|permission| permission.as_str() == tag)
    }

    /// Returns the subject domain half of the tag, e.g. `users`.
    #[must_use]
    pub fn domain(&self) -> &'static str {
        self.as_str()
            .split_once('.')
            .map_or(self.as_str(), |(domain, _)| domain)
    }

    /// Returns the action half of the tag, e.g. `create`.
    #[must_use]
    pub fn action(&self) -> &'static str {
        self.as_str()
            .split_once('.')
            .map_or(self.as_str(), |(_, action)| action)
    }

    /// Returns the human-readable label, action first: `Create Users`.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::All => "All Permissions".to_owned(),
            _ => format!(
                "{} {}",
                capitalize(self.action()),
                capitalize(self.domain())
            ),
        }
    }

    /// Parses a transport value into a permission.
    pub fn from_transport(value: &str) -> Result<Self, AppError> {
        Self::from_str(value)
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == Self::All.as_str() {
            return Ok(Self::All);
        }

        CATALOG
            .iter()
            .copied()
            .find(|permission| permission.as_str() == value)
            .ok_or_else(|| AppError::Validation(format!("unknown permission value '{value}'")))
    }
}

impl Display for Permission {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Named presentational partition of the permission catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionGroup {
    /// Display name of the functional area.
    pub name: &'static str,
    /// Permissions of the area in display order.
    pub permissions: &'static [Permission],
}

const PERMISSION_GROUPS: &[PermissionGroup] = &[
    PermissionGroup {
        name: "User Management",
        permissions: &[
            Permission::UsersView,
            Permission::UsersCreate,
            Permission::UsersEdit,
            Permission::UsersDelete,
        ],
    },
    PermissionGroup {
        name: "Product Management",
        permissions: &[
            Permission::ProductsView,
            Permission::ProductsCreate,
            Permission::ProductsEdit,
            Permission::ProductsDelete,
        ],
    },
    PermissionGroup {
        name: "Order Management",
        permissions: &[
            Permission::OrdersView,
            Permission::OrdersProcess,
            Permission::OrdersEdit,
        ],
    },
    PermissionGroup {
        name: "Inventory Management",
        permissions: &[Permission::InventoryView, Permission::InventoryManage],
    },
    PermissionGroup {
        name: "Sample Management",
        permissions: &[Permission::SamplesView, Permission::SamplesManage],
    },
    PermissionGroup {
        name: "Expo Management",
        permissions: &[Permission::ExpoView, Permission::ExpoManage],
    },
    PermissionGroup {
        name: "Payment Management",
        permissions: &[Permission::PaymentsView, Permission::PaymentsManage],
    },
    PermissionGroup {
        name: "Analytics",
        permissions: &[Permission::AnalyticsView],
    },
    PermissionGroup {
        name: "Settings",
        permissions: &[Permission::SettingsView, Permission::SettingsManage],
    },
    PermissionGroup {
        name: "Admin Management",
        permissions: &[Permission::AdminsManage],
    },
];

/// Returns the permission groups in display order.
#[must_use]
pub fn permission_groups() -> &'static [PermissionGroup] {
    PERMISSION_GROUPS
}

/// Administrative role of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Administrator limited to the explicitly granted permissions.
    Admin,
    /// Administrator holding every permission regardless of stored grants.
    SuperAdmin,
}

impl Role {
    /// Returns a stable storage value for this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::SuperAdmin => "superadmin",
        }
    }

    /// Returns the grants a new profile of this role starts with.
    #[must_use]
    pub fn default_permissions(&self) -> Vec<Permission> {
        match self {
            Self::SuperAdmin => vec![Permission::All],
            Self::Admin => CATALOG.to_vec(),
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "superadmin" => Ok(Self::SuperAdmin),
            _ => Err(AppError::Validation(format!("unknown role '{value}'"))),
        }
    }
}

impl Display for Role {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}
