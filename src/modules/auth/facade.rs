use itertools::Itertools;
use std::collections::HashMap;
use uuid::Uuid;

use super::users::UserRecord;
use super::{otp, password, session, users};
use crate::modules::email::{templates, Mailer};
use crate::modules::store::index::IndexFile;
use crate::modules::store::record::{RecordStore, StoreError};
use crate::modules::utils::io::{is_valid_email, is_valid_username};
use crate::modules::utils::logging::log_auth_event;
use crate::modules::utils::retry::run_with_retry;

/// User-visible failures. Every internal failure kind collapses into one
/// of these three, so a caller cannot tell a missing user from an
/// exhausted index retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    InvalidCredentials,
    UserExists,
    Unknown,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidCredentials => {
                write!(f, "Invalid username and password combination.")
            }
            AuthError::UserExists => write!(f, "A user with that name already exists."),
            AuthError::Unknown => write!(f, "An unknown error occurred. Please try again later."),
        }
    }
}

impl std::error::Error for AuthError {}

/// Internal failure taxonomy. Operations report the precise kind; only
/// the logs keep the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    NotFound,
    Conflict,
    InvalidCredential,
    Expired,
    IndexRace,
    Store,
}

impl From<StoreError> for FailureKind {
    fn from(_: StoreError) -> Self {
        FailureKind::Store
    }
}

impl From<FailureKind> for AuthError {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::NotFound | FailureKind::InvalidCredential | FailureKind::Expired => {
                AuthError::InvalidCredentials
            }
            FailureKind::Conflict => AuthError::UserExists,
            FailureKind::IndexRace | FailureKind::Store => AuthError::Unknown,
        }
    }
}

fn finish<T>(event: &str, subject: &str, result: Result<T, FailureKind>) -> Result<T, AuthError> {
    match result {
        Ok(value) => {
            log_auth_event(event, subject, true, None);
            Ok(value)
        }
        Err(kind) => {
            log_auth_event(event, subject, false, Some(&format!("{:?}", kind)));
            Err(AuthError::from(kind))
        }
    }
}

/// Register a new user. Returns the generated userID.
pub fn register(store: &RecordStore, username: &str, password: &str) -> Result<String, AuthError> {
    finish("register", username, register_inner(store, username, password))
}

fn register_inner(
    store: &RecordStore,
    username: &str,
    password: &str,
) -> Result<String, FailureKind> {
    if !is_valid_username(username) {
        return Err(FailureKind::InvalidCredential);
    }
    if password::validate_password(password).is_err() {
        return Err(FailureKind::InvalidCredential);
    }

    // If the username is already taken, exit
    if users::user_id_by_username(store, username)?.is_some() {
        return Err(FailureKind::Conflict);
    }

    let user_id = Uuid::new_v4().to_string();
    let mut user_file = users::open_user(store, &user_id, true)?.ok_or(FailureKind::Store)?;

    // A freshly generated ID must land on a fresh record
    if user_file.value != UserRecord::default() {
        user_file.close();
        return Err(FailureKind::Store);
    }

    user_file.value.user_id = user_id.clone();
    user_file.value.username = username.to_string();
    user_file.value.password_hash = password::hash_password(password);
    user_file.save()?;

    // Two registrations can race on the shared index file. If the retries
    // run out the user record stays on disk without an index entry until
    // the next reconcile sweep.
    let index = IndexFile::username(store);
    if !run_with_retry("publish username index entry", || {
        index.set(username, Some(&user_id))
    }) {
        return Err(FailureKind::IndexRace);
    }

    Ok(user_id)
}

/// Log a user in. Any session already active is invalidated and a fresh
/// one is issued; the new session ID comes back on success.
pub fn login(store: &RecordStore, username: &str, password: &str) -> Result<String, AuthError> {
    finish("login", username, login_inner(store, username, password))
}

fn login_inner(store: &RecordStore, username: &str, password: &str) -> Result<String, FailureKind> {
    if username.is_empty() || password.is_empty() {
        return Err(FailureKind::InvalidCredential);
    }

    let user_id = users::user_id_by_username(store, username)?.ok_or(FailureKind::NotFound)?;
    let user = users::get_user(store, &user_id)?.ok_or(FailureKind::NotFound)?;

    // The password check comes first; a failed login must not disturb an
    // existing session
    if !password::verify_password(password, &user.password_hash) {
        return Err(FailureKind::InvalidCredential);
    }

    if let Some(old_session) = user.session.as_deref() {
        session::remove(store, old_session)?;
    }

    if !session::create(store, &user_id)? {
        return Err(FailureKind::Store);
    }

    session::fetch(store, &user_id)?.ok_or(FailureKind::Store)
}

/// End a session. False means there was nothing to do.
pub fn logout(store: &RecordStore, session_id: &str) -> Result<bool, AuthError> {
    match session::remove(store, session_id) {
        Ok(removed) => {
            log_auth_event("logout", session_id, removed, None);
            Ok(removed)
        }
        Err(e) => {
            log::error!("Failed to remove session: {}", e);
            Err(AuthError::Unknown)
        }
    }
}

/// Read-side password check, used to confirm the current password before
/// accepting a change. Mutates nothing.
pub fn compare_password(
    store: &RecordStore,
    user_id: &str,
    password: &str,
) -> Result<bool, AuthError> {
    let user = match users::get_user(store, user_id) {
        Ok(Some(user)) => user,
        Ok(None) => return Ok(false),
        Err(e) => {
            log::error!("Failed to read user record {}: {}", user_id, e);
            return Err(AuthError::Unknown);
        }
    };
    if user.password_hash.is_empty() {
        return Ok(false);
    }
    Ok(password::verify_password(password, &user.password_hash))
}

/// Change a username. The old index key is retracted and the new one
/// published, each under bounded retry.
pub fn modify_username(
    store: &RecordStore,
    user_id: &str,
    new_username: &str,
) -> Result<(), AuthError> {
    finish(
        "modify_username",
        user_id,
        modify_username_inner(store, user_id, new_username),
    )
}

fn modify_username_inner(
    store: &RecordStore,
    user_id: &str,
    new_username: &str,
) -> Result<(), FailureKind> {
    if user_id.is_empty() || !is_valid_username(new_username) {
        return Err(FailureKind::InvalidCredential);
    }

    // Uniqueness first, so a conflict leaves both users untouched
    if users::user_id_by_username(store, new_username)?.is_some() {
        return Err(FailureKind::Conflict);
    }

    let mut user_file = users::open_user(store, user_id, false)?.ok_or(FailureKind::NotFound)?;
    let old_username = user_file.value.username.clone();

    let index = IndexFile::username(store);
    if !old_username.is_empty()
        && !run_with_retry("retract username index entry", || {
            index.set(&old_username, None)
        })
    {
        return Err(FailureKind::IndexRace);
    }

    user_file.value.username = new_username.to_string();
    user_file.save()?;

    if !run_with_retry("publish username index entry", || {
        index.set(new_username, Some(user_id))
    }) {
        return Err(FailureKind::IndexRace);
    }

    Ok(())
}

/// Change a password. The new password has to clear the strength rules.
pub fn modify_password(
    store: &RecordStore,
    user_id: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    finish(
        "modify_password",
        user_id,
        modify_password_inner(store, user_id, new_password),
    )
}

fn modify_password_inner(
    store: &RecordStore,
    user_id: &str,
    new_password: &str,
) -> Result<(), FailureKind> {
    if password::validate_password(new_password).is_err() {
        return Err(FailureKind::InvalidCredential);
    }

    let mut user_file = users::open_user(store, user_id, false)?.ok_or(FailureKind::NotFound)?;
    user_file.value.password_hash = password::hash_password(new_password);
    user_file.save()?;

    Ok(())
}

/// Change an email address. The old key is dropped and the new one added
/// in a single index save.
pub fn modify_email(store: &RecordStore, user_id: &str, email: &str) -> Result<(), AuthError> {
    finish("modify_email", user_id, modify_email_inner(store, user_id, email))
}

fn modify_email_inner(store: &RecordStore, user_id: &str, email: &str) -> Result<(), FailureKind> {
    if user_id.is_empty() || !is_valid_email(email) {
        return Err(FailureKind::InvalidCredential);
    }

    let index = IndexFile::email(store);

    // If an account with that email already exists, exit
    if index.get(email)?.is_some() {
        return Err(FailureKind::Conflict);
    }

    let mut user_file = users::open_user(store, user_id, false)?.ok_or(FailureKind::NotFound)?;
    let mut index_file = match index.open()? {
        Some(handle) => handle,
        None => return Err(FailureKind::IndexRace),
    };

    if let Some(old_email) = user_file.value.email.take() {
        index_file.value.remove(&old_email);
    }

    user_file.value.email = Some(email.to_string());
    index_file.value.insert(email.to_string(), user_id.to_string());

    user_file.save()?;
    index_file.save()?;

    Ok(())
}

/// Change a display name
pub fn modify_display_name(store: &RecordStore, user_id: &str, name: &str) -> Result<(), AuthError> {
    finish(
        "modify_display_name",
        user_id,
        modify_display_name_inner(store, user_id, name),
    )
}

fn modify_display_name_inner(
    store: &RecordStore,
    user_id: &str,
    name: &str,
) -> Result<(), FailureKind> {
    if name.is_empty() {
        return Err(FailureKind::InvalidCredential);
    }

    let mut user_file = users::open_user(store, user_id, false)?.ok_or(FailureKind::NotFound)?;
    user_file.value.display_name = Some(name.to_string());
    user_file.save()?;

    Ok(())
}

/// Delete an account: active session, user record, then the username
/// index entry under bounded retry. The email index entry is left for
/// the reconcile sweep.
pub fn delete_account(store: &RecordStore, user_id: &str) -> Result<(), AuthError> {
    finish("delete_account", user_id, delete_account_inner(store, user_id))
}

fn delete_account_inner(store: &RecordStore, user_id: &str) -> Result<(), FailureKind> {
    let user = users::get_user(store, user_id)?.ok_or(FailureKind::NotFound)?;

    // Check if user exists
    if user.username.is_empty() {
        return Err(FailureKind::NotFound);
    }

    // Delete any remaining session
    if let Some(session_id) = user.session.as_deref() {
        session::remove(store, session_id)?;
    }

    store.remove(&users::user_path(user_id))?;

    let index = IndexFile::username(store);
    if !run_with_retry("retract username index entry", || {
        index.set(&user.username, None)
    }) {
        return Err(FailureKind::IndexRace);
    }

    Ok(())
}

/// Issue a reset token and mail it to the account's address. An unknown
/// address is a silent no-op so the endpoint cannot be used to probe for
/// accounts.
pub fn request_password_reset(
    store: &RecordStore,
    mailer: &dyn Mailer,
    email: &str,
) -> Result<(), AuthError> {
    finish(
        "request_password_reset",
        email,
        request_password_reset_inner(store, mailer, email),
    )
}

fn request_password_reset_inner(
    store: &RecordStore,
    mailer: &dyn Mailer,
    email: &str,
) -> Result<(), FailureKind> {
    if !is_valid_email(email) {
        return Err(FailureKind::InvalidCredential);
    }

    let user_id = match users::user_id_by_email(store, email)? {
        Some(user_id) => user_id,
        None => return Ok(()),
    };

    let token = otp::fetch(store, &user_id)?.ok_or(FailureKind::IndexRace)?;
    let body = templates::password_reset_body(&token);

    mailer
        .send(email, templates::PASSWORD_RESET_SUBJECT, &body)
        .map_err(|e| {
            log::error!("Failed to send reset email: {}", e);
            FailureKind::Store
        })?;

    Ok(())
}

/// Redeem a reset token and set a new password. The token is spent
/// either way; an expired or unknown token changes nothing.
pub fn reset_password(
    store: &RecordStore,
    token: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    finish(
        "reset_password",
        token,
        reset_password_inner(store, token, new_password),
    )
}

fn reset_password_inner(
    store: &RecordStore,
    token: &str,
    new_password: &str,
) -> Result<(), FailureKind> {
    let user_id = otp::consume(store, token)?.ok_or(FailureKind::Expired)?;
    modify_password_inner(store, &user_id, new_password)
}

/// Result of an index reconciliation sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Index entries added or re-pointed at their user record
    pub repaired: u32,
    /// Dangling index entries dropped
    pub removed: u32,
}

/// Sweep every user record and repair the secondary indexes: missing or
/// wrong entries are re-pointed, entries whose key no longer appears on
/// the record they name are dropped. This is the recovery path for index
/// writes that ran out of retries.
pub fn reconcile(store: &RecordStore) -> Result<ReconcileReport, AuthError> {
    reconcile_inner(store).map_err(AuthError::from)
}

fn reconcile_inner(store: &RecordStore) -> Result<ReconcileReport, FailureKind> {
    let mut report = ReconcileReport::default();

    let mut records: HashMap<String, UserRecord> = HashMap::new();
    for user_id in store.list("users")? {
        if let Some(user) = users::get_user(store, &user_id)? {
            records.insert(user_id, user);
        }
    }

    reconcile_index(IndexFile::username(store), &records, &mut report, |user| {
        if user.username.is_empty() {
            None
        } else {
            Some(user.username.clone())
        }
    })?;
    reconcile_index(IndexFile::email(store), &records, &mut report, |user| {
        user.email.clone()
    })?;
    reconcile_index(IndexFile::otp(store), &records, &mut report, |user| {
        user.otp.clone()
    })?;

    if report.repaired > 0 || report.removed > 0 {
        log::info!(
            "Index reconciliation repaired {} and removed {} entries",
            report.repaired,
            report.removed
        );
    }

    Ok(report)
}

fn reconcile_index<F>(
    index: IndexFile<'_>,
    records: &HashMap<String, UserRecord>,
    report: &mut ReconcileReport,
    key_of: F,
) -> Result<(), FailureKind>
where
    F: Fn(&UserRecord) -> Option<String>,
{
    let mut index_file = match index.open()? {
        Some(handle) => handle,
        None => return Err(FailureKind::IndexRace),
    };

    // Every live key must point back at its record
    for (user_id, user) in records.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        if let Some(key) = key_of(user) {
            if index_file.value.get(&key).map(String::as_str) != Some(user_id.as_str()) {
                index_file.value.insert(key, user_id.clone());
                report.repaired += 1;
            }
        }
    }

    // Entries naming a missing record, or a record that no longer carries
    // the key, are dangling
    let dangling: Vec<String> = index_file
        .value
        .iter()
        .filter(|(key, user_id)| match records.get(*user_id) {
            Some(user) => key_of(user).as_deref() != Some(key.as_str()),
            None => true,
        })
        .map(|(key, _)| key.clone())
        .sorted()
        .collect();

    for key in dangling {
        index_file.value.remove(&key);
        report.removed += 1;
    }

    index_file.save()?;
    Ok(())
}
