use clap::{Arg, Command};
use itertools::Itertools;
use std::collections::HashMap;

use latchkey::auth::{facade, session, users};
use latchkey::utils::io::prompt_with_confirmation;
use latchkey::utils::logging::initialize_logging;
use latchkey::utils::time::format_timestamp;
use latchkey::{RecordStore, SmtpMailer, USERNAME_INDEX_FILE};

/// Prompt for a password without echoing it
fn prompt_password(prompt: &str) -> String {
    println!("{}", prompt);
    match rpassword::read_password() {
        Ok(password) => password,
        Err(e) => {
            eprintln!("Failed to read password: {}", e);
            std::process::exit(1);
        }
    }
}

/// Resolve a session argument to the owning userID, or explain why not
fn resolve_session(store: &RecordStore, session_id: &str) -> Option<String> {
    match session::verify(store, session_id) {
        Ok(true) => {}
        Ok(false) => {
            println!("Your session expired. Please sign in again!");
            return None;
        }
        Err(e) => {
            eprintln!("Failed to check session: {}", e);
            return None;
        }
    }

    match session::owner(store, session_id) {
        Ok(Some(user_id)) => Some(user_id),
        Ok(None) => {
            println!("Your session expired. Please sign in again!");
            None
        }
        Err(e) => {
            eprintln!("Failed to read session: {}", e);
            None
        }
    }
}

fn main() {
    if let Err(e) = initialize_logging() {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    // Define the command-line interface using clap
    let matches = Command::new("latchkey")
        .about("File-backed username/password authentication")
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .help("Directory holding the auth records")
                .default_value("data"),
        )
        .subcommand(
            Command::new("register")
                .about("Create a new account")
                .arg(Arg::new("username").help("The username to register").required(true)),
        )
        .subcommand(
            Command::new("login")
                .about("Sign in and print a session ID")
                .arg(Arg::new("username").help("The username to sign in as").required(true)),
        )
        .subcommand(
            Command::new("verify")
                .about("Check whether a session is live")
                .arg(Arg::new("session").help("The session ID to check").required(true)),
        )
        .subcommand(
            Command::new("logout")
                .about("End a session")
                .arg(Arg::new("session").help("The session ID to end").required(true)),
        )
        .subcommand(
            Command::new("whoami")
                .about("Show the account behind a session")
                .arg(Arg::new("session").help("A live session ID").required(true)),
        )
        .subcommand(
            Command::new("set-email")
                .about("Set the account email address")
                .arg(Arg::new("session").help("A live session ID").required(true))
                .arg(Arg::new("email").help("The new email address").required(true)),
        )
        .subcommand(
            Command::new("set-name")
                .about("Set the account display name")
                .arg(Arg::new("session").help("A live session ID").required(true))
                .arg(Arg::new("name").help("The new display name").required(true)),
        )
        .subcommand(
            Command::new("change-username")
                .about("Change the account username")
                .arg(Arg::new("session").help("A live session ID").required(true))
                .arg(Arg::new("username").help("The new username").required(true)),
        )
        .subcommand(
            Command::new("change-password")
                .about("Change the account password")
                .arg(Arg::new("session").help("A live session ID").required(true)),
        )
        .subcommand(
            Command::new("delete-account")
                .about("Delete the account behind a session")
                .arg(Arg::new("session").help("A live session ID").required(true)),
        )
        .subcommand(
            Command::new("request-reset")
                .about("Email a password reset token")
                .arg(Arg::new("email").help("The account email address").required(true)),
        )
        .subcommand(
            Command::new("reset-password")
                .about("Redeem a reset token")
                .arg(Arg::new("token").help("The token from the reset email").required(true)),
        )
        .subcommand(Command::new("users").about("List registered usernames"))
        .subcommand(Command::new("reconcile").about("Repair the secondary indexes"))
        .get_matches();

    let data_dir = matches.get_one::<String>("data-dir").unwrap();
    let store = match RecordStore::new(data_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open store at {}: {}", data_dir, e);
            std::process::exit(1);
        }
    };

    // Handle the "register" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("register") {
        let username = sub_matches.get_one::<String>("username").unwrap();
        let password = prompt_password("Choose a password:");

        match facade::register(&store, username, &password) {
            Ok(_) => println!("Account created. You can now log in."),
            Err(e) => println!("{}", e),
        }
    }

    // Handle the "login" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("login") {
        let username = sub_matches.get_one::<String>("username").unwrap();
        let password = prompt_password("Password:");

        match facade::login(&store, username, &password) {
            Ok(session_id) => println!("Signed in. Session: {}", session_id),
            Err(e) => println!("{}", e),
        }
    }

    // Handle the "verify" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("verify") {
        let session_id = sub_matches.get_one::<String>("session").unwrap();

        match session::verify(&store, session_id) {
            Ok(true) => println!("Session is live."),
            Ok(false) => println!("Session is not valid."),
            Err(e) => eprintln!("Failed to check session: {}", e),
        }
    }

    // Handle the "logout" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("logout") {
        let session_id = sub_matches.get_one::<String>("session").unwrap();

        match facade::logout(&store, session_id) {
            Ok(true) => println!("Signed out."),
            Ok(false) => println!("Nothing to do."),
            Err(e) => println!("{}", e),
        }
    }

    // Handle the "whoami" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("whoami") {
        let session_id = sub_matches.get_one::<String>("session").unwrap();

        if let Some(user_id) = resolve_session(&store, session_id) {
            match users::get_user(&store, &user_id) {
                Ok(Some(user)) => {
                    println!("Username: {}", user.username);
                    if let Some(display_name) = user.display_name {
                        println!("Display name: {}", display_name);
                    }
                    if let Some(email) = user.email {
                        println!("Email: {}", email);
                    }
                    if let Some(expiry) = user.session_expiry {
                        println!("Session expires: {}", format_timestamp(expiry));
                    }
                }
                Ok(None) => println!("Account not found."),
                Err(e) => eprintln!("Failed to read account: {}", e),
            }
        }
    }

    // Handle the "set-email" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("set-email") {
        let session_id = sub_matches.get_one::<String>("session").unwrap();
        let email = sub_matches.get_one::<String>("email").unwrap();

        if let Some(user_id) = resolve_session(&store, session_id) {
            match facade::modify_email(&store, &user_id, email) {
                Ok(()) => println!("Email updated."),
                Err(e) => println!("{}", e),
            }
        }
    }

    // Handle the "set-name" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("set-name") {
        let session_id = sub_matches.get_one::<String>("session").unwrap();
        let name = sub_matches.get_one::<String>("name").unwrap();

        if let Some(user_id) = resolve_session(&store, session_id) {
            match facade::modify_display_name(&store, &user_id, name) {
                Ok(()) => println!("Display name updated."),
                Err(e) => println!("{}", e),
            }
        }
    }

    // Handle the "change-username" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("change-username") {
        let session_id = sub_matches.get_one::<String>("session").unwrap();
        let username = sub_matches.get_one::<String>("username").unwrap();

        if let Some(user_id) = resolve_session(&store, session_id) {
            match facade::modify_username(&store, &user_id, username) {
                Ok(()) => println!("Username updated."),
                Err(e) => println!("{}", e),
            }
        }
    }

    // Handle the "change-password" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("change-password") {
        let session_id = sub_matches.get_one::<String>("session").unwrap();

        if let Some(user_id) = resolve_session(&store, session_id) {
            let current = prompt_password("Current password:");
            match facade::compare_password(&store, &user_id, &current) {
                Ok(true) => {}
                Ok(false) => {
                    println!("Current password is incorrect.");
                    return;
                }
                Err(e) => {
                    println!("{}", e);
                    return;
                }
            }

            let new_password = prompt_password("New password:");
            match facade::modify_password(&store, &user_id, &new_password) {
                Ok(()) => println!("Password updated."),
                Err(e) => println!("{}", e),
            }
        }
    }

    // Handle the "delete-account" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("delete-account") {
        let session_id = sub_matches.get_one::<String>("session").unwrap();

        if let Some(user_id) = resolve_session(&store, session_id) {
            let confirmed = prompt_with_confirmation(
                "This permanently deletes the account and its records.",
                "Delete account",
            )
            .unwrap_or(false);
            if !confirmed {
                println!("Cancelled.");
                return;
            }

            match facade::delete_account(&store, &user_id) {
                Ok(()) => println!("Account deleted."),
                Err(e) => println!("{}", e),
            }
        }
    }

    // Handle the "request-reset" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("request-reset") {
        let email = sub_matches.get_one::<String>("email").unwrap();
        let mailer = SmtpMailer::new();

        match facade::request_password_reset(&store, &mailer, email) {
            Ok(()) => println!("If that address has an account, a reset email is on its way."),
            Err(e) => println!("{}", e),
        }
    }

    // Handle the "reset-password" subcommand
    if let Some(sub_matches) = matches.subcommand_matches("reset-password") {
        let token = sub_matches.get_one::<String>("token").unwrap();
        let new_password = prompt_password("New password:");

        match facade::reset_password(&store, token, &new_password) {
            Ok(()) => println!("Password reset. You can now log in."),
            Err(e) => println!("{}", e),
        }
    }

    // Handle the "users" subcommand
    if matches.subcommand_matches("users").is_some() {
        let map: HashMap<String, String> = match store.read(USERNAME_INDEX_FILE) {
            Ok(map) => map.unwrap_or_default(),
            Err(e) => {
                eprintln!("Failed to read username index: {}", e);
                std::process::exit(1);
            }
        };

        if map.is_empty() {
            println!("No users registered.");
        } else {
            for (username, user_id) in map.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
                println!("{} ({})", username, user_id);
            }
        }
    }

    // Handle the "reconcile" subcommand
    if matches.subcommand_matches("reconcile").is_some() {
        match facade::reconcile(&store) {
            Ok(report) => println!(
                "Reconciled: {} entries repaired, {} removed.",
                report.repaired, report.removed
            ),
            Err(e) => println!("{}", e),
        }
    }
}
