use std::io::{self, Write};

/// Helper function to read a line from stdin
pub fn read_line() -> io::Result<String> {
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Helper function to prompt for input with confirmation
pub fn prompt_with_confirmation(prompt: &str, confirmation: &str) -> io::Result<bool> {
    println!("{}", prompt);
    print!("{} (y/n): ", confirmation);
    io::stdout().flush()?;

    let response = read_line()?.to_lowercase();
    Ok(response == "y" || response == "yes")
}

/// Helper function to validate email format
pub fn is_valid_email(email: &str) -> bool {
    // Basic email validation
    email.contains('@')
        && email.contains('.')
        && !email.contains(' ')
        && email.chars().filter(|&c| c == '@').count() == 1
        && email.len() >= 5
}

/// Helper function to validate a username before it reaches the index
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty() && username.len() <= 64 && !username.chars().any(|c| c.is_whitespace())
}
