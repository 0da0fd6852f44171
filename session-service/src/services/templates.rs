//! Plain-text bodies for every mail the service sends.

use chrono::{DateTime, Utc};

use super::notifier::Notification;
use crate::models::Device;

pub fn signup_confirmation(email: &str, base_url: &str, key: &str) -> Notification {
    let link = format!("{}/signup/confirm?key={}", base_url.trim_end_matches('/'), key);
    Notification::new(
        email,
        "Confirm your account",
        format!(
            "Welcome!\n\n\
             Open the following link to finish creating your account:\n\n\
             {}\n\n\
             This link expires in 24 hours. If you did not sign up, ignore this email.",
            link
        ),
    )
}

pub fn signup_completed(email: &str, password: &str) -> Notification {
    Notification::new(
        email,
        "Your account is ready",
        format!(
            "Your account has been created.\n\n\
             Email: {}\n\
             Password: {}\n\n\
             Keep this password somewhere safe.",
            email, password
        ),
    )
}

pub fn reset_confirmation(email: &str, base_url: &str, key: &str) -> Notification {
    let link = format!(
        "{}/password-reset/confirm?key={}",
        base_url.trim_end_matches('/'),
        key
    );
    Notification::new(
        email,
        "Reset your password",
        format!(
            "We received a request to reset your password.\n\n\
             Open the following link to receive a new one:\n\n\
             {}\n\n\
             This link expires in 15 minutes. If you did not ask for this, ignore this email.",
            link
        ),
    )
}

pub fn reset_completed(email: &str, password: &str) -> Notification {
    Notification::new(
        email,
        "Your new password",
        format!(
            "Your password has been reset and every signed-in device was signed out.\n\n\
             Password: {}",
            password
        ),
    )
}

pub fn new_sign_in(
    email: &str,
    device: &Device,
    remote_addr: &str,
    at: DateTime<Utc>,
) -> Notification {
    Notification::new(
        email,
        "New sign-in to your account",
        format!(
            "A new sign-in to your account was recorded.\n\n\
             Time: {}\n\
             Address: {}\n\
             Platform: {}\n\
             Browser: {}\n\n\
             If this wasn't you, reset your password.",
            at.to_rfc3339(),
            remote_addr,
            device.platform,
            device.user_agent
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_from_body(body: &str) -> Option<String> {
        body.lines()
            .find_map(|line| line.strip_prefix("Password: "))
            .map(|p| p.trim().to_string())
    }

    #[test]
    fn test_confirmation_link() {
        let n = signup_confirmation("a@x.com", "https://example.com/", "KEY");
        assert!(n.body.contains("https://example.com/signup/confirm?key=KEY"));
        assert_eq!(n.recipient, "a@x.com");
    }

    #[test]
    fn test_password_line() {
        let n = signup_completed("a@x.com", "abcDEF234");
        assert_eq!(password_from_body(&n.body).as_deref(), Some("abcDEF234"));

        let n = reset_completed("a@x.com", "xyz");
        assert_eq!(password_from_body(&n.body).as_deref(), Some("xyz"));
    }
}
