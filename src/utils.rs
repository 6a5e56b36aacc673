// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! A couple of utility methods that we make use of.

use url::Url;

use crate::error::Error;

/// A URL is considered secure if it uses a secure scheme ("https") or is referring to localhost.
///
/// Returns `false` if the string could not be parsed into a URL at all.
pub fn url_is_secure(url: &str) -> bool {
    let Ok(url) = Url::parse(url) else {
        return false;
    };

    let secure_scheme = url.scheme() == "https";
    let is_localhost = url.host().is_some_and(|e| match e {
        url::Host::Domain(e) => e == "localhost",
        url::Host::Ipv4(e) => e.is_loopback(),
        url::Host::Ipv6(e) => e.is_loopback(),
    });

    secure_scheme || is_localhost
}

/// Validates that `url` is secure (per [`url_is_secure`]), used at
/// construction time for the aggregator endpoint and every provider node
/// (§6: providers and the aggregator are assumed to carry sensitive
/// request data and must not be contacted in the clear off-localhost).
pub fn validate_url_is_secure(url: &str) -> Result<(), Error> {
    if url_is_secure(url) {
        Ok(())
    } else {
        Err(Error::validation(format!("{url:?} must use https (or refer to localhost)")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_is_secure() {
        assert!(url_is_secure("https://rpc.direct.dev/v1/abc/1"));
    }

    #[test]
    fn localhost_http_is_secure() {
        assert!(url_is_secure("http://localhost:8080"));
        assert!(url_is_secure("http://127.0.0.1:8080"));
    }

    #[test]
    fn plain_http_is_insecure() {
        assert!(!url_is_secure("http://example.com"));
    }

    #[test]
    fn garbage_is_insecure() {
        assert!(!url_is_secure("not a url"));
    }

    #[test]
    fn validate_rejects_plain_http() {
        assert!(validate_url_is_secure("http://example.com").is_err());
    }

    #[test]
    fn validate_accepts_https() {
        assert!(validate_url_is_secure("https://example.com").is_ok());
    }
}
