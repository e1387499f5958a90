//! Password strength policy.

use crema_exceptions::{ApiResult, AppException};

/// Characters that satisfy the symbol requirement.
pub const PASSWORD_SYMBOLS: &str = "!@#$%^&*(),.?\":{}|<>_-+=~`[]\\/;'";

/// Minimum length, in characters.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// One requirement a password can miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordRule {
    MinLength,
    Lowercase,
    Uppercase,
    Digit,
    Symbol,
}

impl PasswordRule {
    pub fn describe(&self) -> &'static str {
        match self {
            PasswordRule::MinLength => "at least 8 characters",
            PasswordRule::Lowercase => "a lowercase letter",
            PasswordRule::Uppercase => "an uppercase letter",
            PasswordRule::Digit => "a digit",
            PasswordRule::Symbol => "a symbol",
        }
    }
}

/// Rules `password` fails, in a fixed order. Empty when it is strong.
/// The letter rules only count ASCII letters.
pub fn unmet_rules(password: &str) -> Vec<PasswordRule> {
    let checks = [
        (
            PasswordRule::MinLength,
            password.chars().count() >= MIN_PASSWORD_LENGTH,
        ),
        (
            PasswordRule::Lowercase,
            password.chars().any(|c| c.is_ascii_lowercase()),
        ),
        (
            PasswordRule::Uppercase,
            password.chars().any(|c| c.is_ascii_uppercase()),
        ),
        (
            PasswordRule::Digit,
            password.chars().any(|c| c.is_ascii_digit()),
        ),
        (
            PasswordRule::Symbol,
            password.chars().any(|c| PASSWORD_SYMBOLS.contains(c)),
        ),
    ];

    checks
        .into_iter()
        .filter(|(_, met)| !met)
        .map(|(rule, _)| rule)
        .collect()
}

/// Fails with `invalid-input` naming every unmet rule.
pub fn validate_password(password: &str) -> ApiResult<()> {
    let unmet = unmet_rules(password);
    if unmet.is_empty() {
        return Ok(());
    }

    let missing: Vec<&str> = unmet.iter().map(PasswordRule::describe).collect();
    Err(AppException::invalid_input("Password is too weak")
        .with_detail(format!("Password needs {}", missing.join(", "))))
}
