pub mod password;
pub mod registration;
pub mod session;

use axum::extract::ConnectInfo;
use std::net::SocketAddr;

pub use password::{confirm_password_reset, confirm_password_reset_link, request_password_reset};
pub use registration::{confirm_signup, confirm_signup_link, signup};
pub use session::{list_sessions, login, refresh, revoke_current_session, revoke_session};

/// Peer address recorded on confirmations and sessions.
pub(crate) fn remote_addr(connect_info: Option<ConnectInfo<SocketAddr>>) -> String {
    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
