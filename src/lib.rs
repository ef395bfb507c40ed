// First, declare the modules folder itself
mod modules;

// Re-export everything from modules for easier access
pub use modules::{
    auth,
    email,
    store,
    utils,
};

// Re-export commonly used types
pub use modules::auth::facade::{AuthError, ReconcileReport};
pub use modules::auth::session::SessionRecord;
pub use modules::auth::users::UserRecord;
pub use modules::email::{Mailer, SmtpMailer};
pub use modules::store::index::IndexFile;
pub use modules::store::record::{RecordHandle, RecordStore, StoreError};

// Constants
pub const SESSION_TTL_MS: u64 = 60 * 60 * 1000;
pub const OTP_TTL_MS: u64 = 5 * 60 * 1000;
pub const INDEX_RETRY_LIMIT: u32 = 10;
pub const INDEX_RETRY_DELAY_MS: u64 = 200;

// Fixed index file paths, relative to the store root
pub const USERNAME_INDEX_FILE: &str = "users.json";
pub const EMAIL_INDEX_FILE: &str = "emails.json";
pub const OTP_INDEX_FILE: &str = "otps.json";

// Type aliases
pub type HmacSha256 = hmac::Hmac<sha2::Sha256>;
