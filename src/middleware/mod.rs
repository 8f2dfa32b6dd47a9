/// Middleware module
///
/// Session enforcement for protected routes.

mod access_gate;

pub use access_gate::AccessGate;
