//! CIMC XML API session client.
//!
//! One `CimcClient` talks to one controller. A session runs
//! login → certificate command → logout; the `SessionToken` is consumed by
//! `logout`, so a cookie cannot be reused once the session is closed.
//!
//! Controller HTTP calls use a permissive TLS client (all cert errors
//! accepted): CIMCs ship with self-issued certificates until this tool has
//! replaced them.

use std::fmt;
use std::time::Duration;

use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use url::Url;

use super::xml::{self, LoginReply};
use crate::config::{CsrSettings, Subject};
use crate::error::{CertError, Result};

/// Login cookie (`outCookie`) for one open session.
pub struct SessionToken(String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// Status code and body of a certificate command, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body:   String,
}

/// Build the permissive HTTP client used for all CIMC API calls.
///
/// Accepts any TLS certificate and hostname. `timeout` bounds every request.
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .timeout(timeout)
        .build()
        .map_err(|e| CertError::transport("<client>", e))
}

/// XML API client bound to a single controller.
pub struct CimcClient {
    http:   Client,
    server: String,
    url:    Url,
}

impl CimcClient {
    /// Client for the XML API endpoint `url` of `server`.
    pub fn with_url(http: Client, server: &str, url: Url) -> Self {
        Self { http, server: server.to_string(), url }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    async fn post(&self, body: String) -> Result<RawResponse> {
        let resp = self.http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| CertError::transport(&self.server, e))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| CertError::transport(&self.server, e))?;
        debug!("{} → HTTP {status}", self.url);
        Ok(RawResponse { status, body })
    }

    /// Authenticate and return the session cookie.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionToken> {
        let resp = self.post(xml::login_command(username, password)?).await?;
        match xml::parse_login_response(&resp.body)? {
            LoginReply::Cookie(cookie) => Ok(SessionToken(cookie)),
            LoginReply::Rejected(attributes) => Err(CertError::Authentication {
                server: self.server.clone(),
                attributes,
            }),
        }
    }

    /// Ask the controller to generate and install a self-signed certificate.
    pub async fn generate_self_signed_certificate(
        &self,
        token:   &SessionToken,
        subject: &Subject,
    ) -> Result<RawResponse> {
        self.post(xml::self_signed_command(token.as_str(), subject)?).await
    }

    /// Ask the controller to produce a CSR, uploading it per `csr`.
    pub async fn generate_certificate_signing_request(
        &self,
        token:   &SessionToken,
        subject: &Subject,
        csr:     &CsrSettings,
    ) -> Result<RawResponse> {
        self.post(xml::csr_command(token.as_str(), subject, csr)?).await
    }

    /// Close the session. The response body is not inspected.
    pub async fn logout(&self, token: SessionToken) -> Result<()> {
        self.post(xml::logout_command(token.as_str())?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::{self, ToolConfig};

    const LOGIN_OK: &str =
        r#"<aaaLogin cookie="" response="yes" outCookie="1500000000/7c1b" outRefreshPeriod="600"> </aaaLogin>"#;

    fn client_for(mock: &MockServer) -> CimcClient {
        let http = build_http_client(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/nuova", mock.uri())).unwrap();
        CimcClient::with_url(http, "cimc-01", url)
    }

    #[test]
    fn default_endpoint_is_nuova_over_https() {
        let http = build_http_client(Duration::from_secs(5)).unwrap();
        let url = config::endpoint_url("hx-edge-cimc-01").unwrap();
        let client = CimcClient::with_url(http, "hx-edge-cimc-01", url);
        assert_eq!(client.url.as_str(), "https://hx-edge-cimc-01/nuova");
        assert_eq!(client.server(), "hx-edge-cimc-01");
    }

    #[tokio::test]
    async fn login_returns_cookie() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nuova"))
            .and(header("content-type", "application/xml"))
            .and(body_string_contains(r#"<aaaLogin inName="admin" inPassword="pw">"#))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_OK))
            .expect(1)
            .mount(&mock)
            .await;

        let token = client_for(&mock).login("admin", "pw").await.unwrap();
        assert_eq!(token.as_str(), "1500000000/7c1b");
    }

    #[tokio::test]
    async fn login_without_cookie_is_authentication_error() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<aaaLogin response="yes" errorCode="551" errorDescr="Authorization required"/>"#,
            ))
            .mount(&mock)
            .await;

        let err = client_for(&mock).login("admin", "wrong").await.unwrap_err();
        match err {
            CertError::Authentication { server, attributes } => {
                assert_eq!(server, "cimc-01");
                assert_eq!(attributes["errorCode"], "551");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn login_garbage_is_protocol_error() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string(""))
            .mount(&mock)
            .await;

        let err = client_for(&mock).login("admin", "pw").await.unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[tokio::test]
    async fn unreachable_is_transport_error() {
        let http = build_http_client(Duration::from_secs(5)).unwrap();
        let url = Url::parse("http://127.0.0.1:1/nuova").unwrap();
        let client = CimcClient::with_url(http, "down", url);
        let err = client.login("admin", "pw").await.unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn self_signed_sends_cookie_and_returns_raw_response() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains(r#"<configConfMo cookie="tok""#))
            .and(body_string_contains(r#"selfSigned="yes""#))
            .respond_with(ResponseTemplate::new(200).set_body_string("<configConfMo/>"))
            .expect(1)
            .mount(&mock)
            .await;

        let cfg = ToolConfig::default();
        let resp = client_for(&mock)
            .generate_self_signed_certificate(&SessionToken("tok".into()), cfg.subject())
            .await
            .unwrap();
        assert_eq!(resp, RawResponse { status: 200, body: "<configConfMo/>".into() });
    }

    #[tokio::test]
    async fn csr_request_and_logout() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains(r#"signatureAlgorithm="sha384""#))
            .respond_with(ResponseTemplate::new(200).set_body_string("<configConfMo/>"))
            .expect(1)
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains(r#"<aaaLogout cookie="tok" inCookie="tok">"#))
            .respond_with(ResponseTemplate::new(200).set_body_string("<aaaLogout/>"))
            .expect(1)
            .mount(&mock)
            .await;

        let cfg = ToolConfig::default();
        let client = client_for(&mock);
        let token = SessionToken("tok".into());
        let resp = client
            .generate_certificate_signing_request(&token, &cfg.csr_subject, &cfg.csr)
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        client.logout(token).await.unwrap();
    }
}
