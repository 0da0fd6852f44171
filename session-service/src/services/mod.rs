//! Services layer for session-service.
//!
//! Token signing, payload sealing, the identity store, outbound mail and the
//! session use cases built on top of them.

pub mod cipher;
pub mod email;
pub mod error;
pub mod notifier;
pub mod session;
pub mod store;
pub mod sweep;
pub mod templates;
pub mod token;

pub use cipher::{PayloadCipher, PayloadCiphers};
pub use email::{Mailer, MockMailer, SmtpMailer};
pub use error::{BadParam, ServiceError};
pub use notifier::{MailQueue, MailWorker, MockNotifier, Notification, Notifier, NotifyError, RetryPolicy};
pub use session::{
    AccessContext, LoginInput, SessionService, SessionSettings, SignupInput, SignupRequested,
    TokenTriple,
};
pub use store::{IdentityStore, MemoryIdentityStore, PgIdentityStore};
pub use token::{Purpose, TokenClaims, TokenCodec, TokenKey, TokenSettings};
