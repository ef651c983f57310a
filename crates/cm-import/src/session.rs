//! Authenticated HTTP session towards ENM.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};
use url::Url;

use crate::{Error, Result};

/// Cookie carrying the ENM authentication token.
pub const AUTH_COOKIE: &str = "iPlanetDirectoryPro";
/// Login response header, `0` on success.
const AUTH_ERROR_CODE: &str = "x-autherrorcode";
const AUTH_OK: &str = "0";
/// File in the home directory holding the SSO token of the scripting VM.
pub const SSO_COOKIE_FILE: &str = ".enm_login";
const PASSWORD_CHANGE_MARKER: &str = "redirectToEnmPasswordChange";
const HA_PROXY_HOST: &str = "haproxy";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_NBI_BASE_URI: &str = "bulk-configuration/v1/import-jobs/";

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Protocol and host of ENM, e.g. `https://enm.example.com`. When empty
    /// the host is discovered through the HA proxy of the scripting VM.
    pub host: String,
    pub nbi_base_uri: String,
    /// Without a user name the session authenticates with the SSO cookie file.
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_certificates: bool,
    pub timeout: Duration,
    /// Overrides `~/.enm_login`.
    pub sso_cookie_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            nbi_base_uri: DEFAULT_NBI_BASE_URI.to_string(),
            username: None,
            password: None,
            verify_certificates: false,
            timeout: DEFAULT_TIMEOUT,
            sso_cookie_file: None,
        }
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_nbi_base_uri(mut self, nbi_base_uri: impl Into<String>) -> Self {
        self.nbi_base_uri = nbi_base_uri.into();
        self
    }

    fn uses_sso(&self) -> bool {
        self.username.as_deref().is_none_or(str::is_empty)
    }

    fn sso_cookie_path(&self) -> Option<PathBuf> {
        self.sso_cookie_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(SSO_COOKIE_FILE)))
    }
}

#[derive(Clone)]
struct OpenSession {
    client: Client,
    jar: Arc<Jar>,
    host: Url,
    nbi_url: Url,
}

/// HTTP session towards the CM Import NBI.
///
/// Requests are only allowed between [`NbiSession::open`] and
/// [`NbiSession::close`]. Redirects are never followed: an ENM redirect means
/// the authentication token expired.
pub struct NbiSession {
    config: SessionConfig,
    state: RwLock<Option<OpenSession>>,
}

impl NbiSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn username(&self) -> Option<&str> {
        self.config.username.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.state.read().is_some()
    }

    /// Host of the open session.
    pub fn host(&self) -> Option<String> {
        self.state
            .read()
            .as_ref()
            .map(|s| s.host.as_str().trim_end_matches('/').to_string())
    }

    /// Authenticate towards ENM.
    pub async fn open(&self) -> Result<()> {
        install_rustls_provider();

        let host = if self.config.host.trim().is_empty() {
            self.discover_host().await?
        } else {
            Url::parse(self.config.host.trim())?
        };
        let nbi_url = Url::parse(&join_path(host.as_str(), &self.config.nbi_base_uri))?;

        let jar = Arc::new(Jar::default());
        let client = self.client_builder().cookie_provider(jar.clone()).build()?;
        let session = OpenSession {
            client,
            jar,
            host,
            nbi_url,
        };

        if self.config.uses_sso() {
            debug!(host = %session.host, "Opening session towards ENM with SSO");
            self.load_sso_cookie(&session)?;
        } else {
            debug!(
                host = %session.host,
                user = self.username().unwrap_or_default(),
                "Opening session towards ENM"
            );
            self.login(&session).await?;
        }

        *self.state.write() = Some(session);
        Ok(())
    }

    /// Log out and forget the session cookies.
    pub async fn close(&self) {
        let Some(session) = self.state.write().take() else {
            return;
        };
        debug!(host = %session.host, "Closing session");

        if !self.config.uses_sso() {
            let logout = join_path(session.host.as_str(), "logout");
            if let Err(e) = session.client.get(&logout).send().await {
                warn!(error = %e, "Logout request failed");
            }
        }
    }

    /// Resolve `path` against the session: absolute URLs are kept, paths
    /// starting with `/` are relative to the host, anything else to the NBI
    /// base URI.
    pub fn to_full_url(&self, path: &str) -> Result<Url> {
        let state = self.state.read();
        let session = state.as_ref().ok_or(Error::SessionClosed)?;
        full_url(&session.host, &session.nbi_url, path)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let value = self.get_value(path, query, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// GET with extra headers, returning the raw JSON document.
    pub async fn get_value(
        &self,
        path: &str,
        query: &[(&str, String)],
        headers: Option<HeaderMap>,
    ) -> Result<Value> {
        let (session, url) = self.prepare(path)?;
        let mut request = session.client.get(url).query(query);
        if let Some(headers) = headers {
            request = request.headers(headers);
        }
        read_json(self.send(&session, request).await?).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let (session, url) = self.prepare(path)?;
        let request = session.client.post(url).json(body);
        read_json(self.send(&session, request).await?).await
    }

    pub async fn post_multipart(&self, path: &str, form: reqwest::multipart::Form) -> Result<Value> {
        let (session, url) = self.prepare(path)?;
        let request = session.client.post(url).multipart(form);
        read_json(self.send(&session, request).await?).await
    }

    /// Stream the body of `path` into `writer`, returning the bytes written.
    pub async fn download<W>(&self, path: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let (session, url) = self.prepare(path)?;
        let request = session.client.get(url).header(
            header::ACCEPT,
            "application/octet-stream, application/json, application/hal+json",
        );
        let response = self.send(&session, request).await?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    fn client_builder(&self) -> reqwest::ClientBuilder {
        let mut headers = HeaderMap::new();
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, application/hal+json"),
        );

        Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(self.config.timeout)
            .danger_accept_invalid_certs(!self.config.verify_certificates)
    }

    fn prepare(&self, path: &str) -> Result<(OpenSession, Url)> {
        let session = self.state.read().clone().ok_or(Error::SessionClosed)?;
        let url = full_url(&session.host, &session.nbi_url, path)?;
        Ok((session, url))
    }

    async fn send(&self, session: &OpenSession, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            error!(error = %e, "Connection error");
            Error::Connection(e)
        })?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED
        ) {
            return Ok(response);
        }

        debug!(status = status.as_u16(), url = %response.url(), "Unexpected response status");
        let body = response.text().await.ok().filter(|b| !b.trim().is_empty());
        let sso = self.config.uses_sso();
        if status == StatusCode::FOUND && sso {
            if let Err(e) = self.load_sso_cookie(session) {
                debug!(error = %e, "Failed to reload the SSO cookie");
            }
        }
        Err(status_error(status.as_u16(), body, sso))
    }

    async fn login(&self, session: &OpenSession) -> Result<()> {
        let username = self.config.username.as_deref().unwrap_or_default();
        let password = self.config.password.as_deref().unwrap_or_default();
        let login_url = join_path(session.host.as_str(), "login");

        let response = session
            .client
            .post(&login_url)
            .form(&[("IDToken1", username), ("IDToken2", password)])
            .send()
            .await?;

        let auth_code = response
            .headers()
            .get(AUTH_ERROR_CODE)
            .map(|v| v.to_str().unwrap_or_default().to_string());

        let Some(auth_code) = auth_code else {
            let body = response.text().await.unwrap_or_default();
            let reason = if is_password_change_redirect(&body) {
                format!(
                    "password change required for user [{username}], please change it via the ENM login page"
                )
            } else {
                format!(
                    "please make sure the URL [{}] is a valid ENM URL",
                    session.host.as_str().trim_end_matches('/')
                )
            };
            error!("Failed to open session: {reason}");
            return Err(Error::Login(reason));
        };

        if auth_code != AUTH_OK || !has_auth_cookie(&session.jar, &session.host) {
            error!(user = username, "Invalid login, credentials are invalid");
            return Err(Error::Login(format!(
                "credentials are invalid for user [{username}]"
            )));
        }

        debug!(user = username, "User is logged in");
        Ok(())
    }

    fn load_sso_cookie(&self, session: &OpenSession) -> Result<()> {
        let path = self.config.sso_cookie_path().ok_or(Error::MissingCredentials)?;
        debug!(path = %path.display(), "Loading SSO cookie");

        let token = match std::fs::read_to_string(&path) {
            Ok(content) => content.lines().next().unwrap_or_default().trim().to_string(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open cookie file");
                return Err(Error::MissingCredentials);
            }
        };
        if token.is_empty() {
            warn!(path = %path.display(), "Cookie file is empty");
            return Err(Error::MissingCredentials);
        }

        session
            .jar
            .add_cookie_str(&format!("{AUTH_COOKIE}={token}; Path=/"), &session.host);
        debug!("New authentication cookie is set");
        Ok(())
    }

    /// Find the ENM host from the scripting VM: the HA proxy redirects to the
    /// login page of the real host name.
    async fn discover_host(&self) -> Result<Url> {
        debug!("Looking for the ENM URL");
        let proxy = tokio::net::lookup_host((HA_PROXY_HOST, 443))
            .await?
            .next()
            .ok_or_else(|| Error::Login("failed to determine the ENM host name".to_string()))?;

        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(self.config.timeout)
            .build()?;
        let response = client
            .get(format!("https://{}", proxy.ip()))
            .send()
            .await?
            .error_for_status()?;

        let host = response
            .url()
            .host_str()
            .ok_or_else(|| Error::Login("failed to determine the ENM host name".to_string()))?;
        let url = Url::parse(&format!("https://{host}"))?;
        debug!(url = %url, "Discovered ENM URL");
        Ok(url)
    }
}

/// Map a non-success status to its error.
pub(crate) fn status_error(status: u16, body: Option<String>, sso: bool) -> Error {
    match status {
        204 => Error::NoContent,
        400 => Error::BadRequest { body },
        401 => Error::AccessNotAllowed,
        404 => Error::ServiceUnavailable,
        302 if sso => Error::TokenExpired,
        _ => Error::Request { status, body },
    }
}

fn full_url(host: &Url, nbi_url: &Url, path: &str) -> Result<Url> {
    let url = if path.starts_with("http") {
        Url::parse(path)?
    } else if let Some(rooted) = path.strip_prefix('/') {
        Url::parse(&join_path(host.as_str(), rooted))?
    } else {
        Url::parse(&join_path(nbi_url.as_str(), path))?
    };
    Ok(url)
}

/// Join two path fragments with exactly one `/` between them.
pub(crate) fn join_path(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

async fn read_json(response: Response) -> Result<Value> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

fn has_auth_cookie(jar: &Jar, host: &Url) -> bool {
    jar.cookies(host)
        .and_then(|v| v.to_str().map(str::to_string).ok())
        .is_some_and(|cookies| {
            cookies
                .split(';')
                .any(|c| c.trim_start().starts_with(&format!("{AUTH_COOKIE}=")))
        })
}

/// Whether an HTML login response sends the browser to the password change
/// page, i.e. `<body onload="redirectToEnmPasswordChange()">`.
pub(crate) fn is_password_change_redirect(html: &str) -> bool {
    let lower = html.to_ascii_lowercase();
    let mut rest = lower.as_str();
    let mut original = html;
    while let Some(start) = rest.find("<body") {
        let tag_end = rest[start..].find('>').map_or(rest.len(), |end| start + end);
        let tag_lower = &rest[start..tag_end];
        let tag = &original[start..tag_end];
        if let Some(onload) = tag_lower.find("onload")
            && tag[onload..].contains(PASSWORD_CHANGE_MARKER)
        {
            return true;
        }
        rest = &rest[tag_end..];
        original = &original[tag_end..];
    }
    false
}
