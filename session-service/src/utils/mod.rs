pub mod password;
pub mod random;
pub mod validation;

pub use password::{hash_password, verify_password_or_dummy, Password, PasswordHashString};
pub use random::{generate_confirmation_key, generate_password, generate_public_session_id};
pub use validation::{ValidatedJson, ValidatedQuery};
