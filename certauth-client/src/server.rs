//! The challenge-issuing and verifying server, as seen by the client.
use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use certauth_proto::{
    AuthResult, ChallengeResponse, VerifyRequest, CHALLENGE_PATH, SESSION_ID_PARAM, VERIFY_PATH,
};

use crate::config::ClientConfig;
use crate::error::CertAuthError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// The request could not be sent, or no response was received.
    #[error("request failed: {0}")]
    Network(String),
    /// The server answered with an unexpected status.
    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The server's response could not be understood.
    #[error("malformed server response: {0}")]
    Malformed(String),
    #[error("{0} cannot be used as a base URL")]
    InvalidBaseUrl(String),
}

#[async_trait]
pub trait ServerClient: fmt::Debug + Send + Sync {
    /// Fetches a challenge for `session_id`.
    async fn get_challenge(&self, session_id: &str) -> Result<String, ServerError>;

    /// Submits a signed challenge. Rejections are returned as an [AuthResult]
    /// with `success == false`, not as an error.
    async fn verify(&self, request: &VerifyRequest) -> Result<AuthResult, ServerError>;
}

/// [ServerClient] over HTTP.
///
/// Endpoints are resolved relative to a base URL:
///
/// * `GET <base>/challenge?sessionId=<id>`
/// * `POST <base>/verify`
#[derive(Debug, Clone)]
pub struct HttpServerClient {
    client: reqwest::Client,
    base: Url,
}

/// Statuses the verify endpoint uses to reject an attempt with an
/// [AuthResult] body.
const REJECTION_STATUSES: [StatusCode; 3] = [
    StatusCode::BAD_REQUEST,
    StatusCode::UNAUTHORIZED,
    StatusCode::FORBIDDEN,
];

fn network(e: reqwest::Error) -> ServerError {
    ServerError::Network(e.to_string())
}

impl HttpServerClient {
    pub fn new(
        base: Url,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ServerError> {
        if base.cannot_be_a_base() {
            return Err(ServerError::InvalidBaseUrl(base.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(network)?;

        Ok(HttpServerClient { client, base })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, CertAuthError> {
        Self::new(
            config.api_url()?,
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.connect_timeout_secs),
        )
        .map_err(|e| CertAuthError::Network(e.to_string()))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segment: &str) -> Url {
        let mut url = self.base.clone();
        // `new` rejects URLs which cannot be a base.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(segment);
        }
        url
    }
}

#[async_trait]
impl ServerClient for HttpServerClient {
    async fn get_challenge(&self, session_id: &str) -> Result<String, ServerError> {
        let mut url = self.endpoint(CHALLENGE_PATH);
        url.query_pairs_mut().append_pair(SESSION_ID_PARAM, session_id);
        debug!("GET {}", url);

        let response = self.client.get(url).send().await.map_err(network)?;
        let status = response.status();
        let body = response.text().await.map_err(network)?;
        debug!("Response status: {}", status);

        if !status.is_success() {
            return Err(ServerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let r: ChallengeResponse =
            serde_json::from_str(&body).map_err(|e| ServerError::Malformed(e.to_string()))?;
        if r.challenge.is_empty() {
            return Err(ServerError::Malformed("empty challenge".to_string()));
        }
        Ok(r.challenge)
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<AuthResult, ServerError> {
        let url = self.endpoint(VERIFY_PATH);
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(network)?;
        let status = response.status();
        let body = response.text().await.map_err(network)?;
        debug!("Response status: {}", status);

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| ServerError::Malformed(e.to_string()));
        }

        if REJECTION_STATUSES.contains(&status) {
            if let Ok(r) = serde_json::from_str::<AuthResult>(&body) {
                return Ok(r);
            }
        }

        Err(ServerError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> HttpServerClient {
        let base = Url::parse(&format!("{}/api/auth", server.uri())).unwrap();
        HttpServerClient::new(base, Duration::from_secs(5), Duration::from_secs(5)).unwrap()
    }

    fn verify_request() -> VerifyRequest {
        VerifyRequest {
            session_id: "s1".to_string(),
            challenge: "c1".to_string(),
            signature: "c2lnbmF0dXJl".to_string(),
            certificate: "Y2VydA==".to_string(),
        }
    }

    #[tokio::test]
    async fn challenge() {
        let _ = tracing_subscriber::fmt::try_init();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/challenge"))
            .and(query_param("sessionId", "s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"challenge": "c1"})))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server).await;
        assert_eq!(c.get_challenge("s1").await.unwrap(), "c1");
    }

    #[tokio::test]
    async fn challenge_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/challenge"))
            .and(query_param("sessionId", "empty"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"challenge": ""})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/challenge"))
            .and(query_param("sessionId", "garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/challenge"))
            .and(query_param("sessionId", "down"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let c = client(&server).await;
        assert!(matches!(
            c.get_challenge("empty").await,
            Err(ServerError::Malformed(_))
        ));
        assert!(matches!(
            c.get_challenge("garbage").await,
            Err(ServerError::Malformed(_))
        ));
        assert_eq!(
            c.get_challenge("down").await,
            Err(ServerError::Status {
                status: 503,
                body: "maintenance".to_string()
            })
        );
    }

    #[tokio::test]
    async fn verify_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/verify"))
            .and(body_json(json!({
                "sessionId": "s1",
                "challenge": "c1",
                "signature": "c2lnbmF0dXJl",
                "certificate": "Y2VydA==",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "message": "Welcome"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server).await;
        let r = c.verify(&verify_request()).await.unwrap();
        assert_eq!(r, AuthResult::accepted(Some("Welcome".to_string())));
    }

    #[tokio::test]
    async fn verify_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/verify"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"success": false, "message": "Challenge expired"})),
            )
            .mount(&server)
            .await;

        let c = client(&server).await;
        let r = c.verify(&verify_request()).await.unwrap();
        assert_eq!(r, AuthResult::rejected("Challenge expired"));
    }

    #[tokio::test]
    async fn verify_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/verify"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let c = client(&server).await;
        assert_eq!(
            c.verify(&verify_request()).await,
            Err(ServerError::Status {
                status: 500,
                body: "oops".to_string()
            })
        );
    }

    #[tokio::test]
    async fn unreachable_server() {
        // Nothing listens on the discard port.
        let base = Url::parse("http://127.0.0.1:9/api/auth").unwrap();
        let c = HttpServerClient::new(base, Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            c.get_challenge("s1").await,
            Err(ServerError::Network(_))
        ));
        assert!(matches!(
            c.verify(&verify_request()).await,
            Err(ServerError::Network(_))
        ));
    }

    #[test]
    fn endpoints() {
        for base in ["http://localhost:8080/api/auth", "http://localhost:8080/api/auth/"] {
            let c = HttpServerClient::new(
                Url::parse(base).unwrap(),
                Duration::from_secs(1),
                Duration::from_secs(1),
            )
            .unwrap();
            assert_eq!(
                c.endpoint(VERIFY_PATH).as_str(),
                "http://localhost:8080/api/auth/verify"
            );
        }

        assert_eq!(
            HttpServerClient::new(
                Url::parse("mailto:someone@example.com").unwrap(),
                Duration::from_secs(1),
                Duration::from_secs(1),
            )
            .unwrap_err(),
            ServerError::InvalidBaseUrl("mailto:someone@example.com".to_string())
        );
    }
}
