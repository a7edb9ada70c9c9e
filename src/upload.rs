//! `upload`
//!
//! Delivers a finished program to an OctoPrint print host over its file
//! upload API.

use std::{
    fmt,
    hash::{DefaultHasher, Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

use reqwest::{
    blocking::Client,
    header::{HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONTENT_TYPE},
    StatusCode, Url,
};

use crate::{config::DriverConfig, job::JobArtifact};

/// The header that carries the OctoPrint API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";
/// What OctoPrint answers with.
pub const ACCEPT_VALUE: &str = "application/json, text/javascript, */*; q=0.01";
/// Encodings we claim to accept. The response body is never read.
pub const ACCEPT_ENCODING_VALUE: &str = "gzip, deflate, br";
/// Languages we claim to accept.
pub const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.8";
/// The only status that means the host stored the file.
pub const UPLOAD_CREATED: StatusCode = StatusCode::CREATED;

/// Start of every multipart boundary we generate.
const BOUNDARY_PREFIX: &str = "----OctogrblFormBoundary";

/// Bumped for every boundary generated by this process.
static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors that can occur while uploading a job to the print host.
#[derive(Debug)]
pub enum UploadError {
    /// The upload URL could not be used.
    InvalidUrl {
        /// The URL as configured.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The API key can't be sent as a header value.
    InvalidApiKey,
    /// The request could not be completed: connection refused, timeout, TLS failure or a truncated response.
    Transport(reqwest::Error),
    /// The host answered with something other than `201 Created`.
    UnexpectedStatus(StatusCode),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::InvalidUrl { url, reason } => {
                write!(f, "invalid upload URL {url:?}: {reason}")
            }
            UploadError::InvalidApiKey => {
                write!(f, "API key contains characters that can't be sent in a header")
            }
            UploadError::Transport(err) => write!(f, "request to print host failed: {err}"),
            UploadError::UnexpectedStatus(status) => {
                write!(f, "print host answered {status}, expected {UPLOAD_CREATED}")
            }
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// Parses and checks an upload URL.
///
/// # Arguments
/// * `url`: The configured URL.
///
/// # Errors
/// [`UploadError::InvalidUrl`] if `url` isn't an absolute HTTP or HTTPS URL.
pub fn parse_upload_url(url: &str) -> Result<Url, UploadError> {
    let parsed = Url::parse(url).map_err(|err| UploadError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(UploadError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {scheme:?}"),
        }),
    }
}

/// A way of getting a finished program onto the machine.
pub trait Transport {
    /// Sends a program to the machine.
    ///
    /// # Arguments
    /// * `url`: Where to send it.
    /// * `artifact`: The program and its filename.
    /// * `config`: The driver configuration for this job.
    ///
    /// # Errors
    /// An [`UploadError`] if the machine did not accept the program.
    fn upload(
        &self,
        url: &Url,
        artifact: &JobArtifact,
        config: &DriverConfig,
    ) -> Result<(), UploadError>;

    /// Starts a previously uploaded program.
    ///
    /// # Arguments
    /// * `filename`: The filename the program was uploaded as.
    ///
    /// # Errors
    /// An [`UploadError`] if the machine could not be told to start.
    fn play(&self, _filename: &str) -> Result<(), UploadError> {
        Ok(())
    }
}

/// A `multipart/form-data` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartForm {
    /// The boundary between parts, without the leading `--`.
    boundary: String,
    /// The encoded body.
    body: Vec<u8>,
}

impl MultipartForm {
    /// Builds the form OctoPrint expects for a file upload: `file`, then `select`, then `print`.
    ///
    /// # Arguments
    /// * `artifact`: The program to upload.
    /// * `autoplay`: Whether the host should start the job immediately.
    ///
    /// # Returns
    /// The form, with a boundary that doesn't occur in the program.
    #[must_use]
    pub fn octoprint_upload(artifact: &JobArtifact, autoplay: bool) -> Self {
        let boundary = generate_boundary(&[artifact.payload(), artifact.filename()]);
        Self::octoprint_upload_with_boundary(artifact, autoplay, boundary)
    }

    /// Builds the upload form around a known boundary.
    ///
    /// # Arguments
    /// * `artifact`: The program to upload.
    /// * `autoplay`: Whether the host should start the job immediately.
    /// * `boundary`: The boundary to use. Must not occur in the program.
    fn octoprint_upload_with_boundary(
        artifact: &JobArtifact,
        autoplay: bool,
        boundary: String,
    ) -> Self {
        let mut body = Vec::with_capacity(artifact.payload().len() + 512);
        let delimiter = format!("--{boundary}\r\n");

        body.extend_from_slice(delimiter.as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                artifact.filename()
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(artifact.payload().as_bytes());
        body.extend_from_slice(b"\r\n");

        // the host makes the uploaded file the active job
        body.extend_from_slice(delimiter.as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"select\"\r\n\r\ntrue\r\n");

        body.extend_from_slice(delimiter.as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"print\"\r\n\r\n");
        let print: &[u8] = if autoplay { b"true\r\n" } else { b"false\r\n" };
        body.extend_from_slice(print);

        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        MultipartForm { boundary, body }
    }

    /// Gets the boundary between parts.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Gets the value of the `Content-Type` header for this form.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Gets the encoded body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Takes the encoded body.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Generates a multipart boundary that doesn't appear in any of `contents`.
///
/// # Arguments
/// * `contents`: Everything that will be placed between boundaries.
///
/// # Returns
/// A boundary of 24 prefix characters followed by 16 hex digits.
fn generate_boundary(contents: &[&str]) -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();

    loop {
        let mut hasher = DefaultHasher::new();
        for content in contents {
            content.len().hash(&mut hasher);
        }
        now.hash(&mut hasher);
        BOUNDARY_COUNTER
            .fetch_add(1, Ordering::Relaxed)
            .hash(&mut hasher);
        std::process::id().hash(&mut hasher);

        let boundary = format!("{BOUNDARY_PREFIX}{:016x}", hasher.finish());
        if !contents.iter().any(|content| content.contains(&boundary)) {
            return boundary;
        }
        log::debug!("Boundary {boundary} occurs in form contents, picking another");
    }
}

/// Uploads jobs to OctoPrint with a single multipart `POST`.
///
/// Starting the job is requested in the upload form itself, so [`Transport::play`] does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct OctoPrintUpload;

impl Transport for OctoPrintUpload {
    fn upload(
        &self,
        url: &Url,
        artifact: &JobArtifact,
        config: &DriverConfig,
    ) -> Result<(), UploadError> {
        let mut api_key =
            HeaderValue::from_str(&config.api_key).map_err(|_| UploadError::InvalidApiKey)?;
        api_key.set_sensitive(true);

        let form = MultipartForm::octoprint_upload(artifact, config.autoplay);
        log::info!(
            "Uploading {} ({} bytes) to {url}",
            artifact.filename(),
            artifact.payload().len()
        );
        log::debug!("Using multipart boundary {}", form.boundary());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.upload_timeout_secs))
            .build()
            .map_err(UploadError::Transport)?;

        let response = client
            .post(url.clone())
            .header(CONTENT_TYPE, form.content_type())
            .header(API_KEY_HEADER, api_key)
            .header(ACCEPT, ACCEPT_VALUE)
            .header(ACCEPT_ENCODING, ACCEPT_ENCODING_VALUE)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE)
            .body(form.into_body())
            .send()
            .map_err(|err| {
                log::error!("Error uploading {}: {err}", artifact.filename());
                UploadError::Transport(err)
            })?;

        let status = response.status();
        if status != UPLOAD_CREATED {
            log::error!("Print host rejected {}: {status}", artifact.filename());
            return Err(UploadError::UnexpectedStatus(status));
        }

        log::info!("Print host accepted {}", artifact.filename());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A two line program called `test.gcode`.
    fn artifact() -> JobArtifact {
        JobArtifact::new("G21\nG0 X1 Y1 S0\n".to_string(), "test.gcode".to_string())
    }

    #[test]
    fn test_form_layout() {
        let form = MultipartForm::octoprint_upload_with_boundary(
            &artifact(),
            true,
            "----WebKitFormBoundaryDeC2E3iWbTv1PwMC".to_string(),
        );

        assert_eq!(
            form.content_type(),
            "multipart/form-data; boundary=----WebKitFormBoundaryDeC2E3iWbTv1PwMC"
        );
        assert_eq!(
            std::str::from_utf8(form.body()).expect("body is UTF-8"),
            "------WebKitFormBoundaryDeC2E3iWbTv1PwMC\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"test.gcode\"\r\n\
             Content-Type: application/octet-stream\r\n\
             \r\n\
             G21\nG0 X1 Y1 S0\n\r\n\
             ------WebKitFormBoundaryDeC2E3iWbTv1PwMC\r\n\
             Content-Disposition: form-data; name=\"select\"\r\n\
             \r\n\
             true\r\n\
             ------WebKitFormBoundaryDeC2E3iWbTv1PwMC\r\n\
             Content-Disposition: form-data; name=\"print\"\r\n\
             \r\n\
             true\r\n\
             ------WebKitFormBoundaryDeC2E3iWbTv1PwMC--\r\n"
        );
    }

    #[test]
    fn test_form_print_false() {
        let form = MultipartForm::octoprint_upload(&artifact(), false);
        let body = std::str::from_utf8(form.body()).expect("body is UTF-8");
        assert!(
            body.contains("name=\"print\"\r\n\r\nfalse\r\n"),
            "print should be false: {body}"
        );
    }

    #[test]
    fn test_boundary_not_in_payload() {
        let first = generate_boundary(&[""]);
        let second = generate_boundary(&[""]);
        assert_ne!(first, second, "every request gets a fresh boundary");
        assert!(first.starts_with(BOUNDARY_PREFIX), "boundary prefix");
        assert_eq!(first.len(), BOUNDARY_PREFIX.len() + 16, "boundary length");
        assert!(
            first.bytes().all(|b| b == b'-' || b.is_ascii_alphanumeric()),
            "boundary is a valid token"
        );

        // a payload containing every boundary we might try next
        let upcoming = BOUNDARY_COUNTER.load(Ordering::Relaxed);
        let payload = format!("{first}{second}");
        let chosen = generate_boundary(&[&payload]);
        assert!(!payload.contains(&chosen), "chosen boundary is in payload");
        assert!(BOUNDARY_COUNTER.load(Ordering::Relaxed) > upcoming, "counter advanced");
    }

    #[test]
    fn test_boundary_not_in_filename() {
        let taken: Vec<String> = (0..4).map(|_| generate_boundary(&[""])).collect();
        let filename = taken.concat();

        let artifact = JobArtifact::new("G21\n".to_string(), filename.clone());
        let form = MultipartForm::octoprint_upload(&artifact, false);
        assert!(
            !filename.contains(form.boundary()),
            "boundary {} occurs in filename",
            form.boundary()
        );
        assert!(!artifact.payload().contains(form.boundary()), "boundary in payload");
    }

    #[test]
    fn test_parse_upload_url() {
        assert!(parse_upload_url("http://octopi.local/api/files/local").is_ok());
        assert!(parse_upload_url("https://octopi.local/api/files/sdcard").is_ok());
        assert!(matches!(
            parse_upload_url("octopi.local/api/files/local"),
            Err(UploadError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_upload_url("ftp://octopi.local/upload"),
            Err(UploadError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_invalid_api_key() {
        let config = DriverConfig {
            api_key: "line\nbreak".to_string(),
            upload_url: "http://127.0.0.1:9/api/files/local".to_string(),
            ..Default::default()
        };
        let url = parse_upload_url(&config.upload_url).expect("URL is valid");
        assert!(matches!(
            OctoPrintUpload.upload(&url, &artifact(), &config),
            Err(UploadError::InvalidApiKey)
        ));
    }

    #[test]
    fn test_play_is_a_no_op() {
        assert!(OctoPrintUpload.play("test.gcode").is_ok());
    }

    #[test]
    fn test_unexpected_status_message() {
        let message = UploadError::UnexpectedStatus(StatusCode::OK).to_string();
        assert_eq!(message, "print host answered 200 OK, expected 201 Created");
    }
}
