pub mod auth;

pub use auth::AccessSession;
