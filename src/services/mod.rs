pub mod audit;
pub use audit::AuditService;

pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{
    AuthError, AuthService, ClientInfo, LoginOutcome, RegisteredUser, ResolvedActor,
};
pub use auth_service_impl::SeaOrmAuthService;

pub mod lockout;
pub use lockout::LockState;

pub mod remember;
pub use remember::RememberTokenService;

pub mod session_service;
pub mod session_service_impl;
pub use session_service::{SessionError, SessionService};
pub use session_service_impl::SeaOrmSessionService;
