//! Capability-based authorization.
//!
//! One policy per resource kind, one named rule per action, resolved through
//! an explicit registry instead of runtime type dispatch. Lookup is
//! deny-by-default twice over: a kind with no policy denies everything, and
//! an action with no rule falls back to the `Manage` rule or, failing that,
//! to deny. Rules are pure functions of the actor facts and the resource;
//! nothing here touches storage, so a decision is only ever as fresh as the
//! facts the boundary assembled for this request.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::db::User;
use crate::entities::sessions;

/// The elevated role every "admin ground" rule checks for.
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    List,
    Show,
    Create,
    Update,
    Destroy,
    /// Catch-all; also the fallback for actions without their own rule.
    Manage,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Show => "show",
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
            Self::Manage => "manage",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    User,
    Session,
    Role,
    AuditLog,
}

impl ResourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Session => "session",
            Self::Role => "role",
            Self::AuditLog => "audit_log",
        }
    }
}

/// A resource class, or one concrete record of it when the rule needs to see
/// the instance (ownership checks do; list/create checks don't).
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    User(Option<&'a User>),
    Session(Option<&'a sessions::Model>),
    Role,
    AuditLog,
}

impl Resource<'_> {
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::User(_) => ResourceKind::User,
            Self::Session(_) => ResourceKind::Session,
            Self::Role => ResourceKind::Role,
            Self::AuditLog => ResourceKind::AuditLog,
        }
    }
}

/// Facts about the acting identity, assembled by the boundary once per
/// request. Decisions are never cached across requests because these facts
/// (roles, lock state, the actor existing at all) can change between them.
#[derive(Debug, Clone)]
pub struct PolicyActor {
    user_id: Option<i32>,
    email: Option<String>,
    roles: Vec<String>,
    /// Whether any user exists at all; the bootstrap ground for open
    /// registration on an empty system.
    system_has_users: bool,
}

impl PolicyActor {
    #[must_use]
    pub const fn anonymous(system_has_users: bool) -> Self {
        Self {
            user_id: None,
            email: None,
            roles: Vec::new(),
            system_has_users,
        }
    }

    #[must_use]
    pub fn authenticated(user: &User, roles: Vec<String>, system_has_users: bool) -> Self {
        Self {
            user_id: Some(user.id),
            email: Some(user.email.clone()),
            roles,
            system_has_users,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    /// The "acting on a record that is itself the actor" ground.
    #[must_use]
    pub fn is_self(&self, user: &User) -> bool {
        self.user_id == Some(user.id)
    }

    #[must_use]
    pub fn owns_session(&self, session: &sessions::Model) -> bool {
        self.user_id == Some(session.user_id)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.email.as_deref().unwrap_or("anonymous")
    }

    #[must_use]
    pub const fn system_has_users(&self) -> bool {
        self.system_has_users
    }
}

/// Raised by [`PolicyRegistry::authorize`]; carries enough for the audit
/// collaborator without disclosing which rule failed.
#[derive(Debug, Error)]
#[error("{actor} may not {action} {resource}")]
pub struct Unauthorized {
    pub actor: String,
    pub resource: &'static str,
    pub action: Action,
}

type Rule = fn(&PolicyActor, &Resource<'_>) -> bool;

#[derive(Default)]
pub struct Policy {
    rules: HashMap<Action, Rule>,
}

impl Policy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn rule(mut self, action: Action, rule: Rule) -> Self {
        self.rules.insert(action, rule);
        self
    }
}

#[derive(Default)]
pub struct PolicyRegistry {
    policies: HashMap<ResourceKind, Policy>,
}

impl PolicyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn declare(mut self, kind: ResourceKind, policy: Policy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    /// The boolean form. Missing policy, missing rule and missing `Manage`
    /// fallback all come out `false`.
    #[must_use]
    pub fn allowed(&self, actor: &PolicyActor, resource: &Resource<'_>, action: Action) -> bool {
        let Some(policy) = self.policies.get(&resource.kind()) else {
            return false;
        };

        let rule = policy
            .rules
            .get(&action)
            .or_else(|| policy.rules.get(&Action::Manage));

        match rule {
            Some(rule) => rule(actor, resource),
            None => false,
        }
    }

    /// The raising form for enforcement call sites.
    pub fn authorize(
        &self,
        actor: &PolicyActor,
        resource: &Resource<'_>,
        action: Action,
    ) -> Result<(), Unauthorized> {
        if self.allowed(actor, resource, action) {
            Ok(())
        } else {
            Err(Unauthorized {
                actor: actor.name().to_string(),
                resource: resource.kind().as_str(),
                action,
            })
        }
    }
}

fn admin_only(actor: &PolicyActor, _resource: &Resource<'_>) -> bool {
    actor.is_admin()
}

fn admin_or_self(actor: &PolicyActor, resource: &Resource<'_>) -> bool {
    if actor.is_admin() {
        return true;
    }
    match resource {
        Resource::User(Some(user)) => actor.is_self(user),
        _ => false,
    }
}

/// Open only while no account exists; afterwards user creation is an admin
/// capability.
fn admin_or_bootstrap(actor: &PolicyActor, _resource: &Resource<'_>) -> bool {
    actor.is_admin() || !actor.system_has_users()
}

fn admin_or_session_owner(actor: &PolicyActor, resource: &Resource<'_>) -> bool {
    if actor.is_admin() {
        return true;
    }
    match resource {
        Resource::Session(Some(session)) => actor.owns_session(session),
        _ => false,
    }
}

/// The registry the application mounts. Self-action grounds `show`/`update`
/// but never `destroy`/`manage`; those need the elevated role.
#[must_use]
pub fn default_registry() -> PolicyRegistry {
    PolicyRegistry::new()
        .declare(
            ResourceKind::User,
            Policy::new()
                .rule(Action::List, admin_only)
                .rule(Action::Show, admin_or_self)
                .rule(Action::Update, admin_or_self)
                .rule(Action::Create, admin_or_bootstrap)
                .rule(Action::Destroy, admin_only)
                .rule(Action::Manage, admin_only),
        )
        .declare(
            ResourceKind::Session,
            Policy::new()
                .rule(Action::List, admin_or_session_owner)
                .rule(Action::Show, admin_or_session_owner)
                .rule(Action::Destroy, admin_or_session_owner),
        )
        .declare(ResourceKind::Role, Policy::new().rule(Action::Manage, admin_only))
        .declare(
            ResourceKind::AuditLog,
            Policy::new().rule(Action::Manage, admin_only),
        )
}
