use anyhow::{Result, anyhow};

use crate::models::notification::NotificationRequest;

const MAX_EMAIL_LENGTH: usize = 255;

pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();

    if email.is_empty() {
        return Err(anyhow!("User email is required"));
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(anyhow!(
            "Email cannot exceed {} characters",
            MAX_EMAIL_LENGTH
        ));
    }

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| anyhow!("Invalid email format"))?;

    let valid = !local.is_empty()
        && !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace);

    if !valid {
        return Err(anyhow!("Invalid email format"));
    }

    Ok(())
}

pub fn validate_request(request: &NotificationRequest) -> Result<()> {
    validate_email(&request.user_email)?;

    if request.subject.trim().is_empty() {
        return Err(anyhow!("Subject is required"));
    }

    if request.message.trim().is_empty() {
        return Err(anyhow!("Message is required"));
    }

    Ok(())
}
