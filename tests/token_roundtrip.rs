// Token lifecycle as the gateway drives it: login issues a pair, the access
// token authenticates requests, and the refresh token mints a new pair.
use breakwater::{GatewayError, config::models::TokenConfig, core::TokenService};
use serde_json::Value;

fn config() -> TokenConfig {
    TokenConfig {
        access_secret: "integration-access-secret".to_string(),
        refresh_secret: "integration-refresh-secret".to_string(),
        access_expiry: "15m".to_string(),
        refresh_expiry: "7d".to_string(),
        issuer: "breakwater".to_string(),
    }
}

fn login_claims() -> breakwater::core::token::ClaimSet {
    let mut claims = breakwater::core::token::ClaimSet::new();
    claims.insert("sub".to_string(), Value::from("user-1042"));
    claims.insert("role".to_string(), Value::from("hirer"));
    claims
}

#[test]
fn login_refresh_flow_preserves_identity() {
    let service = TokenService::new(&config()).unwrap();

    // Login.
    let pair = service.generate_token_pair(&login_claims()).unwrap();
    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, 15 * 60);

    // An authenticated request presents the access token.
    let claims = service.verify_access_token(&pair.access_token).unwrap();
    assert_eq!(claims["sub"], "user-1042");
    assert_eq!(claims["role"], "hirer");
    assert_eq!(claims["iss"], "breakwater");

    // Refresh: the refresh token verifies under its own secret and the
    // carried claims seed the next pair.
    let refresh_claims = service.verify_refresh_token(&pair.refresh_token).unwrap();
    let next = service.generate_token_pair(&refresh_claims).unwrap();
    let next_claims = service.verify_access_token(&next.access_token).unwrap();
    assert_eq!(next_claims["sub"], "user-1042");
    assert_eq!(next_claims["role"], "hirer");
}

#[test]
fn tokens_do_not_cross_lanes() {
    let service = TokenService::new(&config()).unwrap();
    let pair = service.generate_token_pair(&login_claims()).unwrap();

    // A refresh token can never be used as an access token, and vice versa.
    assert!(matches!(
        service.verify_access_token(&pair.refresh_token),
        Err(GatewayError::TokenInvalid(_))
    ));
    assert!(matches!(
        service.verify_refresh_token(&pair.access_token),
        Err(GatewayError::TokenInvalid(_))
    ));
}

#[test]
fn foreign_gateway_tokens_are_rejected() {
    let service = TokenService::new(&config()).unwrap();

    let mut other_config = config();
    other_config.access_secret = "some-other-deployment-access".to_string();
    other_config.refresh_secret = "some-other-deployment-refresh".to_string();
    let other = TokenService::new(&other_config).unwrap();

    let foreign = other.generate_access_token(&login_claims()).unwrap();
    assert!(matches!(
        service.verify_access_token(&foreign),
        Err(GatewayError::TokenInvalid(_))
    ));

    // Inspection still works on a foreign token; it just never authenticates.
    let inspected = service.decode_token(&foreign).unwrap();
    assert_eq!(inspected["sub"], "user-1042");
}

#[test]
fn bearer_extraction_feeds_verification() {
    let service = TokenService::new(&config()).unwrap();
    let pair = service.generate_token_pair(&login_claims()).unwrap();

    let header = format!("Bearer {}", pair.access_token);
    let token = TokenService::extract_token_from_header(&header).unwrap();
    assert!(service.verify_access_token(token).is_ok());

    assert!(TokenService::extract_token_from_header("Token abc").is_none());
    assert!(TokenService::extract_token_from_header("").is_none());
}
