use serde::{Deserialize, Serialize};

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub nickname: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body returned by login and refresh. The refresh token travels in an
/// HTTP-only cookie, never in the body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
}

/// Freshly signed access/refresh pair. The raw refresh token exists only in
/// this value and in the client's cookie; the store keeps a salted hash.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_response_uses_camel_case() {
        let json = serde_json::to_string(&LoginResponse {
            access_token: "abc".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"accessToken":"abc"}"#);
    }
}
