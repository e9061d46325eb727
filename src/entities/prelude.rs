pub use super::audit_events::Entity as AuditEvents;
pub use super::roles::Entity as Roles;
pub use super::sessions::Entity as Sessions;
pub use super::user_roles::Entity as UserRoles;
pub use super::users::Entity as Users;
