pub mod confirmation;
pub mod invite_code;
pub mod session;
pub mod user;

pub use confirmation::{ConfirmationKind, PendingConfirmation};
pub use invite_code::{InviteCode, InviteCodeIssued, InviteCodeReserved};
pub use session::{Device, NewSession, Session, SessionRecord, SessionView};
pub use user::{Identity, Language, User};
