//! Capability probe.
//!
//! A metadata-only request that learns the total size of a resource,
//! whether the server advertises byte-range support, and a suggested file
//! name. No payload bytes are transferred.

use std::time::Duration;

use tracing::debug;

use crate::config::Cookie;
use crate::error::{DownloadError, DownloadResult};
use crate::locator::{file_name_from_url, last_segment, Locator};
use crate::transport::{FetchRequest, FetchResponse, Transport};

/// What the probe learned about a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Total size in bytes; 0 when the server did not say.
    pub total_size: u64,
    /// Server advertised `Accept-Ranges: bytes` and a usable size.
    ///
    /// Advisory only: workers still verify each ranged response.
    pub supports_range: bool,
    /// Name from `Content-Disposition`, else the last URL segment.
    pub file_name: Option<String>,
}

/// Probe a resource.
pub fn probe(
    transport: &dyn Transport,
    locator: &Locator,
    cookies: &[Cookie],
    timeout: Duration,
) -> DownloadResult<ProbeReport> {
    let request = FetchRequest::new(locator.as_str(), cookies).with_timeout(timeout);
    let response = transport.head(&request)?;
    check_status(&response, &locator.to_string())?;

    let size = response.content_length();
    let advertises_range = response
        .header("accept-ranges")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"));

    let report = ProbeReport {
        total_size: size.unwrap_or(0),
        supports_range: advertises_range && size.is_some_and(|s| s > 0),
        file_name: suggest_file_name(&response, locator),
    };

    debug!(
        url = %locator,
        status = response.status,
        size = report.total_size,
        supports_range = report.supports_range,
        file_name = ?report.file_name,
        "Probe complete"
    );

    Ok(report)
}

/// Map an unsuccessful status to the matching error.
pub(crate) fn check_status(response: &FetchResponse, label: &str) -> DownloadResult<()> {
    match response.status {
        s if (200..300).contains(&s) => Ok(()),
        404 | 410 => Err(DownloadError::NotFound {
            url: label.to_string(),
        }),
        401 | 403 => Err(DownloadError::Unauthorized {
            url: label.to_string(),
        }),
        s => Err(DownloadError::transport(
            label,
            format!("unexpected status {}", s),
        )),
    }
}

/// Suggested file name for a response.
pub(crate) fn suggest_file_name(response: &FetchResponse, locator: &Locator) -> Option<String> {
    response
        .header("content-disposition")
        .and_then(file_name_from_disposition)
        .or_else(|| file_name_from_url(&response.url))
        .or_else(|| locator.file_name())
}

/// Extract the file name from a `Content-Disposition` header value.
///
/// `filename*=` (RFC 5987, percent-encoded) takes precedence over
/// `filename=`. Directory components are stripped.
pub fn file_name_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in value.split(';').skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = raw.trim();

        match key.as_str() {
            "filename*" => {
                // charset'language'percent-encoded
                let encoded = raw.splitn(3, '\'').nth(2).unwrap_or(raw);
                extended = urlencoding::decode(encoded.trim_matches('"'))
                    .ok()
                    .map(|s| s.into_owned());
            }
            "filename" => plain = Some(unquote(raw)),
            _ => {}
        }
    }

    extended
        .or(plain)
        .and_then(|name| last_segment(&name.replace('\\', "/")))
        .filter(|name| name != "." && name != "..")
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    match s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\""),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::MockTransport;

    fn locator(s: &str) -> Locator {
        Locator::parse(s).unwrap()
    }

    #[test]
    fn test_probe_range_capable() {
        let transport = MockTransport::new(vec![0; 2_000_000], true);
        let report = probe(
            &transport,
            &locator("http://h/files/big.bin"),
            &[],
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(report.total_size, 2_000_000);
        assert!(report.supports_range);
        assert_eq!(report.file_name.as_deref(), Some("big.bin"));
    }

    #[test]
    fn test_probe_without_ranges() {
        let transport = MockTransport::new(vec![0; 10], false);
        let report = probe(&transport, &locator("http://h/a.txt"), &[], Duration::from_secs(5))
            .unwrap();
        assert_eq!(report.total_size, 10);
        assert!(!report.supports_range);
    }

    #[test]
    fn test_probe_status_mapping() {
        let loc = locator("http://h/a.txt");
        for (status, expect) in [(404, "not found"), (401, "denied"), (500, "status 500")] {
            let mut transport = MockTransport::new(vec![], true);
            transport.head_status = status;
            let err = probe(&transport, &loc, &[], Duration::from_secs(1)).unwrap_err();
            assert!(err.to_string().contains(expect), "{}: {}", status, err);
        }
    }

    #[test]
    fn test_unparsable_size_disables_ranges() {
        struct BadLength;
        impl Transport for BadLength {
            fn head(&self, request: &FetchRequest<'_>) -> DownloadResult<FetchResponse> {
                Ok(FetchResponse {
                    status: 200,
                    url: request.url.to_string(),
                    headers: vec![
                        ("Accept-Ranges".into(), "bytes".into()),
                        ("Content-Length".into(), "unknown".into()),
                    ],
                    body: Box::new(std::io::empty()),
                })
            }
            fn get(&self, _request: &FetchRequest<'_>) -> DownloadResult<FetchResponse> {
                unreachable!("probe never fetches payload")
            }
        }

        let report = probe(&BadLength, &locator("http://h/a.txt"), &[], Duration::from_secs(1))
            .unwrap();
        assert_eq!(report.total_size, 0);
        assert!(!report.supports_range);
    }

    #[test]
    fn test_disposition_plain_and_quoted() {
        assert_eq!(
            file_name_from_disposition("attachment; filename=report.pdf").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            file_name_from_disposition("attachment; filename=\"my report.pdf\"").as_deref(),
            Some("my report.pdf")
        );
    }

    #[test]
    fn test_disposition_extended_wins() {
        let value = "attachment; filename=\"fallback.txt\"; filename*=UTF-8''na%C3%AFve.txt";
        assert_eq!(file_name_from_disposition(value).as_deref(), Some("naïve.txt"));
    }

    #[test]
    fn test_disposition_strips_directories() {
        assert_eq!(
            file_name_from_disposition("attachment; filename=\"../../etc/passwd.txt\"").as_deref(),
            Some("passwd.txt")
        );
        assert_eq!(
            file_name_from_disposition("attachment; filename=\"C:\\temp\\a.exe\"").as_deref(),
            Some("a.exe")
        );
        assert_eq!(file_name_from_disposition("inline"), None);
    }
}
