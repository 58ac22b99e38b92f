//! Token-endpoint transport: the only place that talks HTTP.

use {
    async_trait::async_trait,
    reqwest::header::ACCEPT,
    secrecy::ExposeSecret,
    serde::Deserialize,
    tracing::{debug, trace},
};

use crate::{
    error::TransportError,
    types::{RefreshRequest, TokenResponse},
};

/// Performs the `grant_type=refresh_token` exchange.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    async fn refresh(&self, request: &RefreshRequest) -> Result<TokenResponse, TransportError>;
}

/// OAuth error body (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenTransport for ReqwestTransport {
    async fn refresh(&self, request: &RefreshRequest) -> Result<TokenResponse, TransportError> {
        debug!(endpoint = %request.token_endpoint, "posting refresh_token grant");

        let resp = self
            .client
            .post(&request.token_endpoint)
            .header(ACCEPT, "application/json")
            .form(&request.form())
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        trace!(status = status.as_u16(), "token endpoint responded");

        if status.is_success() {
            return parse_token_response(&body);
        }
        Err(classify_failure(status.as_u16(), &body))
    }
}

fn parse_token_response(body: &str) -> Result<TokenResponse, TransportError> {
    let parsed: TokenResponse =
        serde_json::from_str(body).map_err(|e| TransportError::Malformed(e.to_string()))?;
    if parsed.access_token.expose_secret().is_empty() {
        return Err(TransportError::Malformed("empty access_token".into()));
    }
    Ok(parsed)
}

fn classify_failure(status: u16, body: &str) -> TransportError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) if err.error == "invalid_grant" => TransportError::InvalidGrant {
            description: err
                .error_description
                .unwrap_or_else(|| "refresh token is no longer valid".into()),
        },
        Ok(err) => TransportError::Status {
            status,
            error: match err.error_description {
                Some(desc) => format!("{}: {desc}", err.error),
                None => err.error,
            },
        },
        Err(_) => TransportError::Status {
            status,
            error: body.chars().take(200).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, secrecy::Secret};

    fn request(endpoint: String) -> RefreshRequest {
        RefreshRequest {
            token_endpoint: endpoint,
            refresh_token: Secret::new("r1".into()),
            client_id: "cid".into(),
            client_secret: Secret::new("shh".into()),
        }
    }

    #[tokio::test]
    async fn posts_form_and_parses_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "r1".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "shh".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"a2","expires_in":3599,"refresh_token":"r2","token_type":"Bearer"}"#,
            )
            .create_async()
            .await;

        let transport = ReqwestTransport::default();
        let resp = transport
            .refresh(&request(format!("{}/token", server.url())))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(resp.access_token.expose_secret(), "a2");
        assert_eq!(resp.expires_in, Some(3599));
        assert_eq!(resp.refresh_token.unwrap().expose_secret(), "r2");
        assert_eq!(resp.token_type.as_deref(), Some("Bearer"));
    }

    #[tokio::test]
    async fn invalid_grant_is_recognised() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
            .create_async()
            .await;

        let err = ReqwestTransport::default()
            .refresh(&request(format!("{}/token", server.url())))
            .await
            .unwrap_err();
        match err {
            TransportError::InvalidGrant { description } => {
                assert_eq!(description, "Token has been expired or revoked.");
            },
            other => panic!("expected invalid_grant, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let err = ReqwestTransport::default()
            .refresh(&request(format!("{}/token", server.url())))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = ReqwestTransport::default()
            .refresh(&request(format!("http://127.0.0.1:{port}/token")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }

    #[test]
    fn success_without_access_token_is_malformed() {
        assert!(matches!(
            parse_token_response(r#"{"expires_in":3600}"#),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(
            parse_token_response(r#"{"access_token":"","expires_in":3600}"#),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn other_oauth_errors_keep_code() {
        match classify_failure(401, r#"{"error":"invalid_client"}"#) {
            TransportError::Status { status, error } => {
                assert_eq!(status, 401);
                assert_eq!(error, "invalid_client");
            },
            other => panic!("unexpected {other:?}"),
        }
    }
}
