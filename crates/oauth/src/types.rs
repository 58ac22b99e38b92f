use {
    chrono::{DateTime, NaiveDateTime, TimeDelta, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Deserializer, Serialize, Serializer},
};

/// Lifetime assumed when a token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// One OAuth2 grant for one provider account, as persisted on disk.
///
/// Also reads the "authorized user" file written by Google's installed-app
/// flow (`token`, `token_uri`, `scopes`), so an existing `token.json` loads
/// as-is. Writes always use the field names below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(alias = "token", serialize_with = "serialize_secret")]
    pub access_token: Secret<String>,
    #[serde(default, serialize_with = "serialize_option_secret")]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default, deserialize_with = "deserialize_expiry")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "empty_secret", serialize_with = "serialize_secret")]
    pub client_secret: Secret<String>,
    #[serde(default, alias = "token_uri")]
    pub token_endpoint: String,
    #[serde(default, alias = "scopes", deserialize_with = "deserialize_scope")]
    pub scope: String,
}

impl Credential {
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().is_empty())
    }

    /// The token-exchange request for this credential, if it can be refreshed.
    pub fn refresh_request(&self) -> Option<RefreshRequest> {
        let refresh_token = self
            .refresh_token
            .as_ref()
            .filter(|t| !t.expose_secret().is_empty())?;
        Some(RefreshRequest {
            token_endpoint: self.token_endpoint.clone(),
            refresh_token: refresh_token.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        })
    }

    /// Apply a successful exchange. The refresh token is kept unless the
    /// provider rotated it; client identity and scope never change.
    pub fn refreshed(&self, response: TokenResponse, now: DateTime<Utc>) -> Self {
        let lifetime = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let lifetime = TimeDelta::try_seconds(i64::try_from(lifetime).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX);
        let rotated = response
            .refresh_token
            .filter(|t| !t.expose_secret().is_empty());

        Self {
            access_token: response.access_token,
            refresh_token: rotated.or_else(|| self.refresh_token.clone()),
            expiry: now.checked_add_signed(lifetime),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            token_endpoint: self.token_endpoint.clone(),
            scope: self.scope.clone(),
        }
    }

    /// True when both tokens match `other`; used to notice out-of-band re-auth.
    pub fn same_tokens(&self, other: &Credential) -> bool {
        self.access_token.expose_secret() == other.access_token.expose_secret()
            && self.refresh_token.as_ref().map(|t| t.expose_secret())
                == other.refresh_token.as_ref().map(|t| t.expose_secret())
    }
}

/// Body of a `grant_type=refresh_token` request.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub token_endpoint: String,
    pub refresh_token: Secret<String>,
    pub client_id: String,
    pub client_secret: Secret<String>,
}

impl RefreshRequest {
    /// Form fields in the order providers document them.
    pub fn form(&self) -> [(&'static str, &str); 4] {
        [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.expose_secret()),
            ("client_id", &self.client_id),
            ("client_secret", self.client_secret.expose_secret()),
        ]
    }
}

/// Successful response from a token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Secret<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            expires_in: Some(expires_in),
            refresh_token: None,
            token_type: Some("Bearer".into()),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token.into()));
        self
    }
}

fn empty_secret() -> Secret<String> {
    Secret::new(String::new())
}

pub fn serialize_secret<S: Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

pub fn serialize_option_secret<S: Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// RFC 3339, or a naive ISO-8601 timestamp which is taken as UTC.
fn deserialize_expiry<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|e| serde::de::Error::custom(format!("invalid expiry {raw:?}: {e}")))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScopeField {
    Joined(String),
    List(Vec<String>),
}

fn deserialize_scope<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<ScopeField>::deserialize(deserializer)? {
        Some(ScopeField::Joined(s)) => s,
        Some(ScopeField::List(list)) => list.join(" "),
        None => String::new(),
    })
}
