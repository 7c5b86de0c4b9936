//! Who is asking: roles, scopes and identities
//!
//! Actors are built by the transport layer from the authenticated session and
//! passed into every policy call explicitly.

use clinica_core::{IdentityId, ScopeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role an actor acts under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Unauthenticated visitor
    Anonymous,
    /// Authenticated individual (a patient) owning personal records
    Member,
    /// Staff restricted to a single organizational unit
    ScopedStaff,
    /// Organization-wide administrator
    Administrator,
}

impl Role {
    /// All roles, in privilege order
    pub const ALL: [Role; 4] = [
        Role::Anonymous,
        Role::Member,
        Role::ScopedStaff,
        Role::Administrator,
    ];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Anonymous => "anonymous",
            Role::Member => "member",
            Role::ScopedStaff => "scoped_staff",
            Role::Administrator => "administrator",
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anonymous" => Ok(Role::Anonymous),
            "member" => Ok(Role::Member),
            "scoped_staff" => Ok(Role::ScopedStaff),
            "administrator" => Ok(Role::Administrator),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

/// The authenticated (or anonymous) entity attempting an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Role the actor acts under
    pub role: Role,
    /// Organizational unit; only meaningful for [`Role::ScopedStaff`]
    pub scope_id: Option<ScopeId>,
    /// Underlying account identity
    pub identity: Option<IdentityId>,
}

/// Reasons an actor fails well-formedness checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActorInvariantError {
    /// Anonymous actors carry no identity
    #[error("anonymous actor carries an identity")]
    AnonymousWithIdentity,
    /// Only scoped staff may carry a scope
    #[error("{role} actor carries a scope")]
    UnexpectedScope {
        /// Offending role
        role: Role,
    },
    /// Authenticated roles need an identity
    #[error("{role} actor has no identity")]
    MissingIdentity {
        /// Offending role
        role: Role,
    },
}

impl Actor {
    /// Unauthenticated visitor
    pub fn anonymous() -> Self {
        Self {
            role: Role::Anonymous,
            scope_id: None,
            identity: None,
        }
    }

    /// Authenticated member acting on their own records
    pub fn member(identity: impl Into<IdentityId>) -> Self {
        Self {
            role: Role::Member,
            scope_id: None,
            identity: Some(identity.into()),
        }
    }

    /// Staff member assigned to `scope`
    pub fn scoped_staff(identity: impl Into<IdentityId>, scope: impl Into<ScopeId>) -> Self {
        Self {
            role: Role::ScopedStaff,
            scope_id: Some(scope.into()),
            identity: Some(identity.into()),
        }
    }

    /// Staff member not yet approved or assigned to any scope
    pub fn unassigned_staff(identity: impl Into<IdentityId>) -> Self {
        Self {
            role: Role::ScopedStaff,
            scope_id: None,
            identity: Some(identity.into()),
        }
    }

    /// Organization-wide administrator
    pub fn administrator(identity: impl Into<IdentityId>) -> Self {
        Self {
            role: Role::Administrator,
            scope_id: None,
            identity: Some(identity.into()),
        }
    }

    /// Check the role/scope/identity combination
    ///
    /// Scoped staff without a scope is well-formed; it just never satisfies a
    /// scope match.
    pub fn validate(&self) -> Result<(), ActorInvariantError> {
        match self.role {
            Role::Anonymous => {
                if self.scope_id.is_some() {
                    return Err(ActorInvariantError::UnexpectedScope { role: self.role });
                }
                if self.identity.is_some() {
                    return Err(ActorInvariantError::AnonymousWithIdentity);
                }
            }
            Role::Member | Role::Administrator => {
                if self.scope_id.is_some() {
                    return Err(ActorInvariantError::UnexpectedScope { role: self.role });
                }
                if self.identity.is_none() {
                    return Err(ActorInvariantError::MissingIdentity { role: self.role });
                }
            }
            Role::ScopedStaff => {
                if self.identity.is_none() {
                    return Err(ActorInvariantError::MissingIdentity { role: self.role });
                }
            }
        }
        Ok(())
    }

    /// Scope usable for matching, `None` for everything but assigned staff
    pub fn assigned_scope(&self) -> Option<&ScopeId> {
        match self.role {
            Role::ScopedStaff => self.scope_id.as_ref(),
            _ => None,
        }
    }

    /// Whether this actor bypasses rule grants
    pub fn is_administrator(&self) -> bool {
        self.role == Role::Administrator
    }
}
