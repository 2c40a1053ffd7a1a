/// Router Module Index
///
/// Routes are split by access level. Access control is attached per module as
/// an Axum layer, so a protected endpoint cannot be mounted without it.

/// Routes reachable without a token: liveness probes and login.
pub mod public;

/// Routes behind the `require_auth` layer. Role gates (admin, admin or
/// professor) are applied per handler through the `AdminOnly` and
/// `AdminOrProfessor` extractors.
pub mod authenticated;
