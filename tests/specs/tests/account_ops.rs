// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account-surface operations: registration, profile updates, password
//! management, and the OAuth redirect URL builder.

use skillwave::api::{oauth_login_url, ProfileUpdate};
use skillwave::error::AuthError;
use skillwave::store;

use skillwave_specs::MockPlatform;

#[tokio::test]
async fn register_roundtrips_the_profile() -> anyhow::Result<()> {
    let platform = MockPlatform::spawn().await?;
    let (api, _store) = platform.auth_api()?;

    let user = api.register("Grace Hopper", "grace@example.com", "pw").await?;
    assert_eq!(user.id, 43);
    assert_eq!(user.name, "Grace Hopper");
    assert_eq!(user.email, "grace@example.com");
    assert!(!user.email_verified);
    Ok(())
}

#[tokio::test]
async fn register_with_missing_fields_is_an_api_error() -> anyhow::Result<()> {
    let platform = MockPlatform::spawn().await?;
    let (api, _store) = platform.auth_api()?;

    let err = api.register("", "grace@example.com", "pw").await;
    assert!(
        matches!(err, Err(AuthError::Api { status: 400, .. })),
        "got: {err:?}"
    );
    Ok(())
}

#[tokio::test]
async fn profile_update_requires_authentication() -> anyhow::Result<()> {
    let platform = MockPlatform::spawn().await?;
    let (api, _store) = platform.auth_api()?;

    let update = ProfileUpdate { name: Some("Nobody".into()), ..Default::default() };
    let err = api.update_profile(&update).await;
    assert!(
        matches!(err, Err(AuthError::Api { status: 401, .. })),
        "an unauthenticated update passes through as a plain API error: {err:?}"
    );
    Ok(())
}

#[tokio::test]
async fn profile_update_changes_the_served_name() -> anyhow::Result<()> {
    let platform = MockPlatform::spawn().await?;
    let (api, store) = platform.auth_api()?;

    let tokens = api.login("ada@example.com", "pw").await?;
    store.set(store::ACCESS_TOKEN, &tokens.access_token);

    let update = ProfileUpdate { name: Some("Ada L.".into()), ..Default::default() };
    let updated = api.update_profile(&update).await?;
    assert_eq!(updated.name, "Ada L.");

    let fetched = api.current_user().await?;
    assert_eq!(fetched.name, "Ada L.");
    Ok(())
}

#[tokio::test]
async fn change_password_verifies_the_current_one() -> anyhow::Result<()> {
    let platform = MockPlatform::spawn().await?;
    let (api, store) = platform.auth_api()?;

    let tokens = api.login("ada@example.com", "pw").await?;
    store.set(store::ACCESS_TOKEN, &tokens.access_token);

    api.change_password("pw", "new-pw").await?;

    let err = api.change_password("wrong", "new-pw").await;
    assert!(matches!(err, Err(AuthError::Api { status: 400, .. })), "got: {err:?}");
    Ok(())
}

#[tokio::test]
async fn password_reset_flow_is_accepted() -> anyhow::Result<()> {
    let platform = MockPlatform::spawn().await?;
    let (api, _store) = platform.auth_api()?;

    api.forgot_password("ada@example.com").await?;
    api.reset_password("reset-token-123", "brand-new-pw").await?;
    Ok(())
}

#[test]
fn oauth_urls_point_at_the_platform() {
    let url = oauth_login_url("https://api.skillwave.example", "google");
    assert_eq!(
        url.as_deref(),
        Some("https://api.skillwave.example/api/auth/oauth2/google/login")
    );
    assert_eq!(oauth_login_url("https://api.skillwave.example", "saml"), None);
}
