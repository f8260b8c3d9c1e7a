pub mod jwt;
pub mod middleware;
pub mod principal;

pub use principal::{HandshakeError, Principal, Role};
