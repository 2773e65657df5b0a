//! Remote audio for the URL variant.
//!
//! The relay fetches whatever URL the caller names, so requests that target
//! the relay's own host or network are refused up front and redirects may not
//! lead there from a public origin.

use crate::error::RelayError;
use crate::upload::source::ByteStream;
use futures_util::StreamExt;
use log::debug;
use reqwest::Url;
use reqwest::redirect::{Attempt, Policy};
use std::net::IpAddr;

/// True when `url` names a loopback, private, link-local or unspecified
/// address, or `localhost` itself.
///
/// Only literal hosts are checked; a public name that resolves to a private
/// address passes.
pub fn is_local_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let lowered = host.to_ascii_lowercase();
    if lowered == "localhost" || lowered.ends_with(".localhost") {
        return true;
    }
    match host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
        }
        Ok(IpAddr::V6(ip)) => {
            ip.is_loopback()
                || ip.is_unspecified()
                || ip.is_unique_local()
                || ip.is_unicast_link_local()
                || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback() || v4.is_private())
        }
        Err(_) => false,
    }
}

/// Follow at most `max` redirects, over http(s) only, never from a public
/// origin onto a local host.
pub fn redirect_policy(max: usize) -> Policy {
    Policy::custom(move |attempt| decide(attempt, max))
}

fn decide(attempt: Attempt<'_>, max: usize) -> reqwest::redirect::Action {
    if attempt.previous().len() > max {
        return attempt.error(format!("more than {max} redirects"));
    }
    if !matches!(attempt.url().scheme(), "http" | "https") {
        debug!("Not following redirect to {}", attempt.url());
        return attempt.stop();
    }
    let origin_is_local = attempt.previous().first().is_some_and(is_local_host);
    if is_local_host(attempt.url()) && !origin_is_local {
        debug!("Not following redirect onto local host {}", attempt.url());
        return attempt.stop();
    }
    attempt.follow()
}

/// GET `url` and stream its body.
///
/// A redirect that is not followed surfaces as its 3xx status, which counts
/// as a failure like any other non-success status.
pub async fn fetch(url: &str, max_redirects: usize) -> Result<ByteStream, RelayError> {
    let http = reqwest::Client::builder()
        .redirect(redirect_policy(max_redirects))
        .build()
        .map_err(|e| RelayError::UploadSource {
            message: format!("failed to build HTTP client: {e}"),
        })?;

    debug!("Fetching remote audio from {url}");
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| RelayError::UploadSource {
            message: format!("failed to fetch audio URL: {e}"),
        })?;
    if !response.status().is_success() {
        return Err(RelayError::UploadSource {
            message: format!("audio URL returned status {}", response.status()),
        });
    }
    Ok(response
        .bytes_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other))
        .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::response::Redirect;
    use axum::routing::get;

    async fn spawn_audio_host() -> String {
        let app = Router::new()
            .route("/talk.wav", get(|| async { "RIFFdata" }))
            .route("/moved", get(|| async { Redirect::temporary("/talk.wav") }))
            .route("/loop", get(|| async { Redirect::temporary("/loop") }))
            .route("/ftp", get(|| async { Redirect::temporary("ftp://example.com/a.wav") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}")
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<_> = stream.collect().await;
        chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect()
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_local_hosts_detected() {
        for raw in [
            "http://localhost/a.wav",
            "http://LOCALHOST:8080/a.wav",
            "http://api.localhost/a.wav",
            "http://127.0.0.1/a.wav",
            "http://10.1.2.3/a.wav",
            "http://192.168.0.10/a.wav",
            "http://172.16.5.5/a.wav",
            "http://169.254.169.254/latest/meta-data",
            "http://0.0.0.0/a.wav",
            "http://[::1]/a.wav",
            "http://[fd00::1]/a.wav",
            "http://[fe80::1]/a.wav",
            "http://[::ffff:127.0.0.1]/a.wav",
        ] {
            assert!(is_local_host(&url(raw)), "{raw} should be local");
        }
    }

    #[test]
    fn test_public_hosts_pass() {
        for raw in [
            "https://cdn.example.com/talk.mp3",
            "http://8.8.8.8/a.wav",
            "http://[2001:db8::1]/a.wav",
            "https://localhost.example.com/a.wav",
        ] {
            assert!(!is_local_host(&url(raw)), "{raw} should be public");
        }
    }

    #[tokio::test]
    async fn test_fetch_follows_redirect() {
        let host = spawn_audio_host().await;
        let body = collect(fetch(&format!("{host}/moved"), 5).await.unwrap()).await;
        assert_eq!(body, b"RIFFdata");
    }

    #[tokio::test]
    async fn test_fetch_gives_up_on_redirect_loop() {
        let host = spawn_audio_host().await;
        let result = fetch(&format!("{host}/loop"), 3).await;
        match result {
            Err(RelayError::UploadSource { message }) => {
                assert!(message.contains("failed to fetch audio URL"), "got: {message}")
            }
            other => panic!("expected upload source error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_fetch_with_redirects_disabled_fails() {
        let host = spawn_audio_host().await;
        assert!(matches!(
            fetch(&format!("{host}/moved"), 0).await,
            Err(RelayError::UploadSource { .. })
        ));
    }

    #[tokio::test]
    async fn test_redirect_off_http_is_not_followed() {
        let host = spawn_audio_host().await;
        assert!(matches!(
            fetch(&format!("{host}/ftp"), 5).await,
            Err(RelayError::UploadSource { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_fails() {
        let host = spawn_audio_host().await;
        match fetch(&format!("{host}/missing.wav"), 5).await {
            Err(RelayError::UploadSource { message }) => {
                assert!(message.contains("404"), "got: {message}")
            }
            other => panic!("expected upload source error, got {:?}", other.map(|_| ())),
        }
    }
}
