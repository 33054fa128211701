//! Roles and the capability checks derived from them.

use serde::{Deserialize, Serialize};

/// Fixed role vocabulary. Handlers never compare role names directly;
/// they ask a [`RoleSet`] for a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access including user administration and the audit log
    Admin,
    /// Counter staff: browse the catalog, run carts and checkouts
    Staff,
    /// Inventory manager: catalog, stock and reports
    SuperUser,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Staff, Role::SuperUser];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::SuperUser => "super_user",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            "super_user" | "superuser" => Ok(Role::SuperUser),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// The roles held by an actor, plus the legacy `is_admin` flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleSet {
    roles: Vec<Role>,
    #[serde(skip)]
    admin_flag: bool,
}

impl RoleSet {
    pub fn new(mut roles: Vec<Role>, admin_flag: bool) -> Self {
        roles.sort();
        roles.dedup();
        Self { roles, admin_flag }
    }

    /// Parse role names as stored in the database, ignoring unknown names
    pub fn from_names<I, S>(names: I, admin_flag: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let roles = names
            .into_iter()
            .filter_map(|n| n.as_ref().parse::<Role>().ok())
            .collect();
        Self::new(roles, admin_flag)
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn has(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.admin_flag || self.has(Role::Admin)
    }

    /// Create, edit and delete products, adjust stock
    pub fn can_manage_inventory(&self) -> bool {
        self.is_admin() || self.has(Role::SuperUser)
    }

    pub fn can_manage_categories(&self) -> bool {
        self.can_manage_inventory()
    }

    /// Create and delete users, change roles, act on behalf of other users
    pub fn can_manage_users(&self) -> bool {
        self.is_admin()
    }

    pub fn can_view_reports(&self) -> bool {
        self.is_admin() || self.has(Role::SuperUser)
    }

    pub fn can_view_audit_log(&self) -> bool {
        self.is_admin()
    }

    pub fn names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("Super_User".parse::<Role>().unwrap(), Role::SuperUser);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_capabilities() {
        let admin = RoleSet::new(vec![Role::Admin], false);
        let super_user = RoleSet::new(vec![Role::SuperUser], false);
        let staff = RoleSet::new(vec![Role::Staff], false);

        assert!(admin.can_manage_users());
        assert!(admin.can_manage_inventory());
        assert!(admin.can_view_audit_log());

        assert!(super_user.can_manage_inventory());
        assert!(super_user.can_view_reports());
        assert!(!super_user.can_manage_users());
        assert!(!super_user.can_view_audit_log());

        assert!(!staff.can_manage_inventory());
        assert!(!staff.can_view_reports());
        assert!(!staff.can_manage_users());
    }

    #[test]
    fn test_admin_flag_grants_admin_capabilities() {
        let flagged = RoleSet::new(vec![], true);
        assert!(flagged.is_admin());
        assert!(flagged.can_manage_users());
        assert!(flagged.names().is_empty());
    }

    #[test]
    fn test_from_names_skips_unknown_and_dedups() {
        let set = RoleSet::from_names(["staff", "bogus", "staff", "admin"], false);
        assert_eq!(set.roles(), &[Role::Admin, Role::Staff]);
    }
}
