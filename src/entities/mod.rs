pub mod prelude;

pub mod audit_events;
pub mod roles;
pub mod sessions;
pub mod user_roles;
pub mod users;
