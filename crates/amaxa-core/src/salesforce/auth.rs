//! Session establishment
//!
//! An access token is used as-is. Username/password credentials go through the
//! SOAP partner `login()` call, whose response carries the session Id and the
//! server URL the session is bound to.

use super::endpoints;
use super::rest::{RestClient, SalesforceConfig};
use amaxa_common::{AmaxaError, Result};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info};

const PRODUCTION_LOGIN_URL: &str = "https://login.salesforce.com";
const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com";

/// How to authenticate to an org
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    AccessToken {
        instance_url: String,
        access_token: String,
    },
    UsernamePassword {
        username: String,
        password: String,
        security_token: Option<String>,
        sandbox: bool,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::AccessToken { instance_url, .. } => f
                .debug_struct("AccessToken")
                .field("instance_url", instance_url)
                .finish_non_exhaustive(),
            Credentials::UsernamePassword {
                username, sandbox, ..
            } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("sandbox", sandbox)
                .finish_non_exhaustive(),
        }
    }
}

/// An authenticated session
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub instance_url: String,
    pub access_token: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("instance_url", &self.instance_url)
            .finish_non_exhaustive()
    }
}

/// Establish a session and build a REST client for it.
pub async fn connect(credentials: &Credentials, config: &SalesforceConfig) -> Result<RestClient> {
    let session = authenticate(credentials, config).await?;
    RestClient::new(session.instance_url, session.access_token, config)
}

pub async fn authenticate(credentials: &Credentials, config: &SalesforceConfig) -> Result<Session> {
    match credentials {
        Credentials::AccessToken {
            instance_url,
            access_token,
        } => {
            debug!("Using access token for {}", instance_url);
            Ok(Session {
                instance_url: instance_url.trim_end_matches('/').to_string(),
                access_token: access_token.clone(),
            })
        },
        Credentials::UsernamePassword {
            username,
            password,
            security_token,
            sandbox,
        } => {
            let login_url = config.login_url.as_deref().unwrap_or(if *sandbox {
                SANDBOX_LOGIN_URL
            } else {
                PRODUCTION_LOGIN_URL
            });
            let password = format!("{}{}", password, security_token.as_deref().unwrap_or(""));

            soap_login(config, login_url, username, &password).await
        },
    }
}

async fn soap_login(
    config: &SalesforceConfig,
    login_url: &str,
    username: &str,
    password: &str,
) -> Result<Session> {
    let url = endpoints::soap_login_url(login_url, &config.api_version);
    info!("Logging in as {} via {}", username, login_url);

    let response = config
        .http_client()?
        .post(&url)
        .header("Content-Type", "text/xml; charset=UTF-8")
        .header("SOAPAction", "login")
        .body(login_envelope(username, password))
        .send()
        .await?;

    // Login faults come back as HTTP 500 with a SOAP fault body.
    let body = response.text().await?;
    parse_login_response(&body)
}

fn login_envelope(username: &str, password: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8" ?>"#,
            r#"<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema""#,
            r#" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#,
            r#" xmlns:env="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<env:Body><n1:login xmlns:n1="urn:partner.soap.sforce.com">"#,
            r#"<n1:username>{}</n1:username><n1:password>{}</n1:password>"#,
            r#"</n1:login></env:Body></env:Envelope>"#
        ),
        escape(username),
        escape(password)
    )
}

/// Pull `sessionId` and `serverUrl` out of a login response, or the fault
/// string out of a login fault.
pub fn parse_login_response(xml: &str) -> Result<Session> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut element: Option<String> = None;
    let mut session_id = None;
    let mut server_url = None;
    let mut fault = None;

    loop {
        let event = reader.read_event().map_err(malformed)?;
        match event {
            Event::Start(start) => {
                element = Some(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
            },
            Event::Text(text) => {
                let text = text.unescape().map_err(malformed)?.into_owned();
                match element.as_deref() {
                    Some("sessionId") => session_id = Some(text),
                    Some("serverUrl") => server_url = Some(text),
                    Some("faultstring") => fault = Some(text),
                    _ => {},
                }
            },
            Event::End(_) => element = None,
            Event::Eof => break,
            _ => {},
        }
    }

    if let Some(fault) = fault {
        return Err(AmaxaError::Authentication(fault));
    }

    match (session_id, server_url) {
        (Some(access_token), Some(server_url)) => Ok(Session {
            instance_url: instance_from_server_url(&server_url),
            access_token,
        }),
        _ => Err(AmaxaError::Authentication(
            "The login response did not contain a session".to_string(),
        )),
    }
}

fn malformed(e: impl std::fmt::Display) -> AmaxaError {
    AmaxaError::Authentication(format!("Malformed login response: {}", e))
}

/// `https://host/services/Soap/u/52.0/00D...` -> `https://host`
fn instance_from_server_url(server_url: &str) -> String {
    match server_url.find("/services/") {
        Some(index) => server_url[..index].to_string(),
        None => server_url.trim_end_matches('/').to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const LOGIN_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns="urn:partner.soap.sforce.com">
  <soapenv:Body>
    <loginResponse>
      <result>
        <metadataServerUrl>https://caprica.my.salesforce.com/services/Soap/m/52.0/00D000000000001</metadataServerUrl>
        <passwordExpired>false</passwordExpired>
        <sandbox>false</sandbox>
        <serverUrl>https://caprica.my.salesforce.com/services/Soap/u/52.0/00D000000000001</serverUrl>
        <sessionId>00D000000000001!AQ0AQ.token</sessionId>
      </result>
    </loginResponse>
  </soapenv:Body>
</soapenv:Envelope>"#;

    const LOGIN_FAULT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:sf="urn:fault.partner.soap.sforce.com">
  <soapenv:Body>
    <soapenv:Fault>
      <faultcode>INVALID_LOGIN</faultcode>
      <faultstring>INVALID_LOGIN: Invalid username, password, security token; or user locked out.</faultstring>
    </soapenv:Fault>
  </soapenv:Body>
</soapenv:Envelope>"#;

    #[test]
    fn test_parses_session() {
        let session = parse_login_response(LOGIN_RESPONSE).unwrap();

        assert_eq!(session.instance_url, "https://caprica.my.salesforce.com");
        assert_eq!(session.access_token, "00D000000000001!AQ0AQ.token");
    }

    #[test]
    fn test_fault_is_authentication_error() {
        let err = parse_login_response(LOGIN_FAULT).unwrap_err();

        match err {
            AmaxaError::Authentication(message) => assert!(message.starts_with("INVALID_LOGIN")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_envelope_escapes_credentials() {
        let envelope = login_envelope("baltar@caprica.gov", "p<ss&word");

        assert!(envelope.contains("<n1:username>baltar@caprica.gov</n1:username>"));
        assert!(envelope.contains("<n1:password>p&lt;ss&amp;word</n1:password>"));
    }

    #[tokio::test]
    async fn test_access_token_is_used_directly() {
        let credentials = Credentials::AccessToken {
            instance_url: "https://caprica.my.salesforce.com/".to_string(),
            access_token: "token".to_string(),
        };

        let session = authenticate(&credentials, &SalesforceConfig::default())
            .await
            .unwrap();
        assert_eq!(session.instance_url, "https://caprica.my.salesforce.com");
        assert_eq!(session.access_token, "token");
    }
}
