//! Resource locators.
//!
//! A [`Locator`] is the parsed form of the URL a job downloads from. Only
//! `http`, `https` and `ftp` are accepted; `ftp` selects the legacy
//! single-stream path.

use std::fmt;

use url::{Host, Position, Url};

use crate::error::{DownloadError, DownloadResult};

/// Protocol scheme of a locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Ftp,
}

impl Scheme {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "ftp" => Some(Self::Ftp),
            _ => None,
        }
    }

    /// Lower-case scheme name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Ftp => "ftp",
        }
    }

    /// Port used when the locator does not name one.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
            Self::Ftp => 21,
        }
    }
}

/// Credentials embedded in the locator's userinfo.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A parsed resource locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    url: Url,
    scheme: Scheme,
    host: String,
    credentials: Option<Credentials>,
}

impl Locator {
    /// Parse a locator string.
    pub fn parse(input: &str) -> DownloadResult<Self> {
        let input = input.trim();
        let invalid = |reason: String| DownloadError::InvalidLocator {
            locator: mask_userinfo(input),
            reason,
        };

        let url = Url::parse(input).map_err(|e| invalid(e.to_string()))?;
        let scheme = Scheme::parse(url.scheme())
            .ok_or_else(|| invalid(format!("unsupported scheme '{}'", url.scheme())))?;

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(invalid("missing host".to_string())),
        };

        let credentials = (!url.username().is_empty() || url.password().is_some()).then(|| {
            Credentials {
                username: decode(url.username()),
                password: url.password().map(decode).unwrap_or_default(),
            }
        });

        Ok(Self {
            url,
            scheme,
            host,
            credentials,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, if the locator names a non-default one.
    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Port to connect to, falling back to the scheme default.
    pub fn port_or_default(&self) -> u16 {
        self.url
            .port_or_known_default()
            .unwrap_or_else(|| self.scheme.default_port())
    }

    /// Path and query, still percent-encoded.
    pub fn path(&self) -> &str {
        &self.url[Position::BeforePath..Position::AfterQuery]
    }

    /// Path without the query string, percent-decoded.
    pub fn decoded_path(&self) -> String {
        decode(self.url.path())
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Whether this locator addresses the legacy file-transfer protocol.
    pub fn is_legacy(&self) -> bool {
        self.scheme == Scheme::Ftp
    }

    /// The normalized locator (credentials included).
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Percent-decoded last path segment, if non-empty.
    pub fn file_name(&self) -> Option<String> {
        last_segment(&self.decoded_path())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.url.password().is_none() {
            return f.write_str(self.url.as_str());
        }
        let mut shown = self.url.clone();
        // Only fails for URLs that cannot carry credentials.
        if shown.set_password(Some("***")).is_err() {
            return f.write_str(&mask_userinfo(self.url.as_str()));
        }
        f.write_str(shown.as_str())
    }
}

/// Percent-decoded last path segment of a URL string.
pub(crate) fn file_name_from_url(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    last_segment(&decode(url.path()))
}

/// Last non-empty `/`-separated segment of a decoded path.
pub(crate) fn last_segment(path: &str) -> Option<String> {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Hide the userinfo of a string that failed to parse.
fn mask_userinfo(input: &str) -> String {
    match (input.split_once("://"), input.rfind('@')) {
        (Some((scheme, _)), Some(at)) => format!("{}://***{}", scheme, &input[at..]),
        _ => input.to_string(),
    }
}
