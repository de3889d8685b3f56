use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{COOKIE, LAST_MODIFIED, SET_COOKIE};
use reqwest::StatusCode;
use serde_json::Value;
use tempfile::NamedTempFile;
use time::format_description::well_known::Rfc2822;
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info, warn};

use super::{
    AppRef, CatalogGateway, Credentials, CredentialsError, DownloadHandle, DownloadReceipt,
    GatewayError, Release,
};

const USER_AGENT: &str = concat!("sbsync/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplunkbaseSettings {
    pub api_url: String,
    pub download_url: String,
    pub attempts: usize,
    /// Delay before the first retry; doubled after each further attempt.
    pub backoff: Duration,
}

/// Outcome of a single HTTP exchange.
enum Attempt<T> {
    Done(T),
    Retry(GatewayError),
    Fatal(GatewayError),
}

pub struct SplunkbaseGateway {
    client: Client,
    settings: SplunkbaseSettings,
    credentials: Result<Credentials, String>,
    session: OnceLock<Result<String, GatewayError>>,
}

impl SplunkbaseGateway {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        settings: SplunkbaseSettings,
        credentials: Result<Credentials, CredentialsError>,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            settings,
            credentials: credentials.map_err(|err| err.to_string()),
            session: OnceLock::new(),
        })
    }

    /// Session cookie header, logging in on first use. The result, failure
    /// included, is reused for the rest of the run.
    fn session(&self) -> Result<&str, GatewayError> {
        self.session
            .get_or_init(|| self.login())
            .as_deref()
            .map_err(Clone::clone)
    }

    fn login(&self) -> Result<String, GatewayError> {
        let credentials = self
            .credentials
            .as_ref()
            .map_err(|reason| GatewayError::AuthFailure(reason.clone()))?;
        let url = format!("{}/api/account:login/", self.settings.api_url);
        info!(user = %credentials.username, "logging in to Splunkbase");
        self.with_retry("login", || {
            let response = match self
                .client
                .post(&url)
                .form(&[
                    ("username", credentials.username.as_str()),
                    ("password", credentials.password.as_str()),
                ])
                .send()
            {
                Ok(response) => response,
                Err(err) => return request_failure("login", &err),
            };
            if let Some(attempt) = classify_status(response.status(), "login") {
                return attempt;
            }
            let cookies: Vec<String> = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .filter_map(|raw| raw.split(';').next())
                .map(str::trim)
                .filter(|pair| pair.contains('='))
                .map(ToOwned::to_owned)
                .collect();
            if cookies.is_empty() {
                return Attempt::Fatal(GatewayError::AuthFailure(
                    "login succeeded but no session cookie was returned".into(),
                ));
            }
            debug!(cookies = cookies.len(), "Splunkbase session established");
            Attempt::Done(cookies.join("; "))
        })
    }

    fn with_retry<T>(
        &self,
        what: &str,
        mut attempt: impl FnMut() -> Attempt<T>,
    ) -> Result<T, GatewayError> {
        let attempts = self.settings.attempts.max(1);
        let mut delay = self.settings.backoff;
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt() {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry(err) if tries >= attempts => {
                    warn!(what, attempts, error = %err, "giving up");
                    return Err(err);
                }
                Attempt::Retry(err) => {
                    warn!(what, attempt = tries, error = %err, "retrying after {delay:?}");
                    thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }

    fn download_once(
        &self,
        handle: &DownloadHandle,
        cookie: &str,
        parent: &Path,
        destination: &Path,
    ) -> Attempt<DownloadReceipt> {
        let what = format!("download of app {} {}", handle.uid, handle.version);
        let mut response = match self.client.get(&handle.url).header(COOKIE, cookie).send() {
            Ok(response) => response,
            Err(err) => return request_failure(&what, &err),
        };
        if let Some(attempt) = classify_status(response.status(), &what) {
            return attempt;
        }
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);

        let mut tmp = match NamedTempFile::new_in(parent) {
            Ok(tmp) => tmp,
            Err(err) => return Attempt::Fatal(io_failure(parent, &err)),
        };
        let mut buffer = vec![0_u8; DOWNLOAD_CHUNK];
        let mut written: u64 = 0;
        loop {
            let read = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) => {
                    return Attempt::Retry(GatewayError::Transient(format!(
                        "stream error during {what}: {err}"
                    )))
                }
            };
            if let Err(err) = tmp.write_all(&buffer[..read]) {
                return Attempt::Fatal(io_failure(tmp.path(), &err));
            }
            written += read as u64;
        }
        if let Err(err) = tmp.as_file().sync_all() {
            return Attempt::Fatal(io_failure(tmp.path(), &err));
        }
        if let Err(err) = tmp.persist(destination) {
            return Attempt::Fatal(io_failure(destination, &err.error));
        }
        Attempt::Done(DownloadReceipt {
            path: destination.to_path_buf(),
            bytes: written,
            last_modified,
        })
    }
}

impl CatalogGateway for SplunkbaseGateway {
    fn fetch_latest(&self, app: &AppRef) -> Result<Release, GatewayError> {
        let cookie = self.session()?;
        let url = format!("{}/api/v1/app/{}/release/", self.settings.api_url, app.uid);
        let what = format!("release lookup for app {}", app.uid);
        let releases = self.with_retry(&what, || {
            let response = match self.client.get(&url).header(COOKIE, cookie).send() {
                Ok(response) => response,
                Err(err) => return request_failure(&what, &err),
            };
            if let Some(attempt) = classify_status(response.status(), &what) {
                return attempt;
            }
            match response.json::<Value>() {
                Ok(value) => Attempt::Done(value),
                Err(err) if err.is_decode() => Attempt::Fatal(GatewayError::Malformed(format!(
                    "{what} returned a body that is not JSON: {err}"
                ))),
                Err(err) => request_failure(&what, &err),
            }
        })?;

        let Some(entries) = releases.as_array() else {
            return Err(GatewayError::Malformed(format!(
                "{what} did not return a list of releases"
            )));
        };
        let Some(first) = entries.first() else {
            return Err(GatewayError::NotFound(format!(
                "the catalog lists no releases for app {}",
                app.uid
            )));
        };
        let Some(version) = first.get("name").and_then(Value::as_str) else {
            return Err(GatewayError::Malformed(format!(
                "{what} returned a release without a version name"
            )));
        };
        debug!(uid = app.uid, version, "latest catalog release");
        Ok(Release {
            version: version.to_string(),
            handle: self.release(app, version),
            metadata: Some(first.clone()),
        })
    }

    fn release(&self, app: &AppRef, version: &str) -> DownloadHandle {
        DownloadHandle {
            uid: app.uid,
            version: version.to_string(),
            url: format!(
                "{}/api/v2/apps/{}/releases/{version}/download/?origin=sb&lead=false",
                self.settings.download_url, app.uid
            ),
        }
    }

    fn download(
        &self,
        handle: &DownloadHandle,
        destination: &Path,
    ) -> Result<DownloadReceipt, GatewayError> {
        let cookie = self.session()?;
        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|err| io_failure(parent, &err))?;
        info!(
            uid = handle.uid,
            version = %handle.version,
            path = %destination.display(),
            "downloading release"
        );
        let receipt = self.with_retry("download", || {
            self.download_once(handle, cookie, parent, destination)
        })?;
        debug!(bytes = receipt.bytes, path = %receipt.path.display(), "download complete");
        Ok(receipt)
    }
}

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")
}

fn classify_status<T>(status: StatusCode, what: &str) -> Option<Attempt<T>> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        401 | 403 => Attempt::Fatal(GatewayError::AuthFailure(format!(
            "Splunkbase rejected the credentials during {what} ({status})"
        ))),
        404 => Attempt::Fatal(GatewayError::NotFound(format!(
            "{what} found nothing ({status})"
        ))),
        429 | 500 | 502 | 503 | 504 => {
            Attempt::Retry(GatewayError::Transient(format!("{what} failed with {status}")))
        }
        _ => Attempt::Fatal(GatewayError::Transient(format!(
            "{what} failed with unexpected status {status}"
        ))),
    })
}

fn request_failure<T>(what: &str, err: &reqwest::Error) -> Attempt<T> {
    Attempt::Retry(GatewayError::Transient(format!("{what} failed: {err}")))
}

fn io_failure(path: &Path, err: &std::io::Error) -> GatewayError {
    GatewayError::Io(format!("{}: {err}", path.display()))
}

/// Parses an HTTP `Last-Modified` value such as `Mon, 10 Nov 2025 10:00:00 GMT`.
fn parse_http_date(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    OffsetDateTime::parse(raw, &Rfc2822).ok().or_else(|| {
        PrimitiveDateTime::parse(
            raw,
            format_description!(
                "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
            ),
        )
        .ok()
        .map(PrimitiveDateTime::assume_utc)
    })
}
