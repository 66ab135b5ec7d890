//! Unverified JWT claim extraction for the impersonation flow (§4.3 step 5).
//!
//! The round-tripper never verifies the token's signature — the upstream
//! API server does that when the token is presented as the bearer
//! credential. This only needs to read one claim out of the payload.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;

/// Decode_claim extracts a single string claim from a JWT's payload segment
/// without verifying the signature. Returns `None` if the token isn't
/// well-formed, the payload isn't JSON, or the claim is absent/non-string.
pub fn decode_claim(token: &str, claim: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: Value = serde_json::from_slice(&decoded).ok()?;
    value.get(claim)?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_jwt(claims_json: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims_json.as_bytes());
        format!("{header}.{payload}.")
    }

    #[test]
    fn extracts_present_string_claim() {
        let tok = make_jwt(r#"{"preferred_username":"alice"}"#);
        assert_eq!(decode_claim(&tok, "preferred_username").as_deref(), Some("alice"));
    }

    #[test]
    fn missing_claim_is_none() {
        let tok = make_jwt(r#"{"sub":"123"}"#);
        assert_eq!(decode_claim(&tok, "preferred_username"), None);
    }

    #[test]
    fn non_string_claim_is_none() {
        let tok = make_jwt(r#"{"preferred_username":42}"#);
        assert_eq!(decode_claim(&tok, "preferred_username"), None);
    }

    #[test]
    fn malformed_token_is_none() {
        assert_eq!(decode_claim("not-a-jwt", "sub"), None);
    }
}
