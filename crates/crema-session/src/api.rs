//! Auth endpoint paths and wire bodies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const LOGIN: &str = "auth/login";
pub const REGISTER: &str = "auth/register";
pub const VERIFY_OTP: &str = "auth/verify-otp";
pub const VERIFY_OTP_AND_LOGIN: &str = "auth/verify-otp-and-login";
pub const FORGOT_PASSWORD: &str = "auth/forgot-password";
pub const RESET_FORGOTTEN_PASSWORD: &str = "auth/reset-forgotten-password";
pub const CHANGE_PASSWORD: &str = "auth/reset-password";
pub const REFRESH_TOKEN: &str = "auth/refresh-token";
pub const LOGOUT: &str = "auth/logout";
pub const PROFILE: &str = "auth/profile";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub display_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpRequest<'a> {
    pub email: &'a str,
    pub code: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetForgottenPasswordRequest<'a> {
    pub email: &'a str,
    pub code: &'a str,
    pub new_password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest<'a> {
    pub current_password: &'a str,
    pub new_password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
    pub client_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest<'a> {
    pub refresh_token: &'a str,
}

/// `result.data` of a passcode confirmation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpVerification {
    #[serde(default)]
    pub reset_token: Option<String>,
}

/// The user's profile as served by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub is_premium: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_bodies_are_camel_case() {
        let body = serde_json::to_value(ResetForgottenPasswordRequest {
            email: "a@b.com",
            code: "123456",
            new_password: "Passw0rd!",
            reset_token: None,
        })
        .unwrap();
        assert_eq!(body["newPassword"], "Passw0rd!");
        assert!(body.get("resetToken").is_none());

        let body = serde_json::to_value(RefreshRequest {
            refresh_token: "rt",
            client_id: "c",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"refreshToken": "rt", "clientId": "c"}));
    }

    #[test]
    fn test_otp_verification_tolerates_null_data() {
        let parsed: OtpVerification = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(parsed.reset_token.is_none());

        let parsed: OtpVerification =
            serde_json::from_value(serde_json::json!({"resetToken": "rt-1"})).unwrap();
        assert_eq!(parsed.reset_token.as_deref(), Some("rt-1"));
    }
}
