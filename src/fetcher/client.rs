//! HTTP client construction
//!
//! One shared client carries the connection pool for the whole crawl.
//! Redirects are never followed automatically; the engine records and
//! filters every hop itself.

use crate::config::{Options, SecureProtocol};
use reqwest::{redirect::Policy, Client};
use std::fs;
use std::time::Duration;

/// How long an idle pooled connection is kept around
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Idle connections kept per host
const POOL_MAX_IDLE_PER_HOST: usize = 4;

/// Builds the HTTP client from crawl options
///
/// # Arguments
///
/// * `options` - The crawl options
///
/// # Returns
///
/// * `Ok(Client)` - Ready client
/// * `Err(reqwest::Error)` - Builder rejected the configuration
pub fn build_http_client(options: &Options) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(options.protocol.user_agent.clone())
        .redirect(Policy::none())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .gzip(options.protocol.http_compression)
        .brotli(options.protocol.http_compression)
        .cookie_store(false);

    // Name resolution happens inside the connect phase here, so the DNS
    // timeout folds into the connect timeout.
    let connect = match (options.timing.connect_timeout, options.timing.dns_timeout) {
        (Some(c), Some(d)) => Some(c.max(d)),
        (c, d) => c.or(d),
    };
    if let Some(connect) = connect {
        builder = builder.connect_timeout(connect);
    }

    if !options.protocol.keep_alive {
        builder = builder.pool_max_idle_per_host(0);
    }

    if let Some(addr) = options.protocol.bind_address {
        builder = builder.local_address(addr);
    }

    match options.tls.secure_protocol {
        SecureProtocol::Auto => {}
        SecureProtocol::TlsV1_2 => {
            builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);
        }
        SecureProtocol::TlsV1_3 => {
            builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_3);
        }
    }

    if !options.tls.check_certificate {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(ca_path) = &options.tls.ca_certificate {
        if let Ok(pem) = fs::read(ca_path) {
            match reqwest::Certificate::from_pem(&pem) {
                Ok(cert) => builder = builder.add_root_certificate(cert),
                Err(e) => tracing::warn!("Ignoring unusable CA certificate: {}", e),
            }
        }
    }

    if let (Some(cert_path), Some(key_path)) =
        (&options.tls.certificate, &options.tls.private_key)
    {
        if let (Ok(mut cert), Ok(mut key)) = (fs::read(cert_path), fs::read(key_path)) {
            cert.append(&mut key);
            match reqwest::Identity::from_pem(&cert) {
                Ok(identity) => builder = builder.identity(identity),
                Err(e) => tracing::warn!("Ignoring unusable client certificate: {}", e),
            }
        }
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_client() {
        let options = Options::default();
        assert!(build_http_client(&options).is_ok());
    }

    #[test]
    fn test_build_without_verification() {
        let mut options = Options::default();
        options.tls.check_certificate = false;
        assert!(build_http_client(&options).is_ok());
    }

    #[test]
    fn test_build_with_min_tls() {
        let mut options = Options::default();
        options.tls.secure_protocol = SecureProtocol::TlsV1_3;
        assert!(build_http_client(&options).is_ok());
    }
}
