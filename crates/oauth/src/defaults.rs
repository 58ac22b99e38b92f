/// Token endpoints of the providers the sales tools authenticate against.
const BUILTIN_TOKEN_ENDPOINTS: &[(&str, &str)] = &[
    ("google", "https://oauth2.googleapis.com/token"),
    ("calendly", "https://auth.calendly.com/oauth/token"),
];

pub fn builtin_token_endpoint(provider: &str) -> Option<&'static str> {
    BUILTIN_TOKEN_ENDPOINTS
        .iter()
        .find(|(name, _)| *name == provider)
        .map(|(_, url)| *url)
}

/// Environment variable overriding a provider's token endpoint,
/// e.g. `SALESMCP_OAUTH_GOOGLE_TOKEN_URL`.
pub fn token_endpoint_env_var(provider: &str) -> String {
    format!(
        "SALESMCP_OAUTH_{}_TOKEN_URL",
        provider.to_uppercase().replace('-', "_")
    )
}

/// Pick the token endpoint for a credential.
///
/// Priority:
/// 1. Environment variable (`SALESMCP_OAUTH_{PROVIDER}_TOKEN_URL`)
/// 2. Config file override
/// 3. The endpoint stored in the credential itself
/// 4. Built-in default
pub fn resolve_token_endpoint(
    provider: &str,
    configured: Option<&str>,
    stored: &str,
) -> Option<String> {
    let from_env = std::env::var(token_endpoint_env_var(provider)).ok();
    pick_endpoint(provider, from_env.as_deref(), configured, stored)
}

fn pick_endpoint(
    provider: &str,
    from_env: Option<&str>,
    configured: Option<&str>,
    stored: &str,
) -> Option<String> {
    [from_env, configured, Some(stored)]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .or_else(|| builtin_token_endpoint(provider))
        .filter(|s| url::Url::parse(s).is_ok())
        .map(str::to_string)
}
