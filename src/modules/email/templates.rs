/// Subject line for password reset messages
pub const PASSWORD_RESET_SUBJECT: &str = "Password Reset Request";

/// Build the plain-text body for a password reset message
pub fn password_reset_body(token: &str) -> String {
    format!(
        "Hello,\n\n\
        A password reset was requested for your account.\n\n\
        To reset your password, use the following token:\n\n\
        {}\n\n\
        This token will expire in 5 minutes and can only be used once.\n\n\
        If you did not request this reset, please ignore this email and ensure \
        your account is secure.\n",
        token
    )
}
