//! Master password policy and strength estimate.

use crate::error::{VaultError, VaultResult};

pub const MIN_MASTER_PASSWORD_LEN: usize = 10;

/// Checks a new master password and its confirmation.
pub fn validate_new_master_password(password: &str, confirm: &str) -> VaultResult<()> {
    if password.chars().count() < MIN_MASTER_PASSWORD_LEN {
        return Err(VaultError::PasswordPolicy(format!(
            "must be at least {MIN_MASTER_PASSWORD_LEN} characters"
        )));
    }
    if password != confirm {
        return Err(VaultError::PasswordPolicy("passwords do not match".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordStrength {
    /// 0..=4
    pub score: u8,
    pub label: &'static str,
}

pub fn strength(password: &str) -> PasswordStrength {
    let len = password.chars().count();
    let checks = [
        len >= MIN_MASTER_PASSWORD_LEN,
        len >= 16,
        password.chars().any(char::is_lowercase) && password.chars().any(char::is_uppercase),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
    ];
    let score = checks.iter().filter(|passed| **passed).count().min(4) as u8;
    let label = if len < MIN_MASTER_PASSWORD_LEN {
        "Too short"
    } else {
        match score {
            0 | 1 => "Weak",
            2 => "Fair",
            3 => "Good",
            _ => "Strong",
        }
    };
    PasswordStrength { score, label }
}
