//! OAuth 2.0: anti-CSRF state, PKCE и сборка URL авторизации

use crate::error::ConnectorResult;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

const STATE_BYTES: usize = 16;
const VERIFIER_BYTES: usize = 32;

/// Результат подготовки авторизации.
///
/// `code_verifier` есть только у платформ с PKCE; вызывающий хранит его
/// сам и передаёт обратно при обмене кода на токен.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
}

/// Новый 128-битный state в hex на каждый вызов
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Пара PKCE verifier/challenge (метод S256)
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = Self::challenge_for(&verifier);
        Pkce { verifier, challenge }
    }

    pub fn challenge_for(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }

    pub const METHOD: &'static str = "S256";
}

/// Добавляет параметры и свежий state к адресу авторизации платформы
pub fn authorize_url(base: &str, params: &[(&str, &str)]) -> ConnectorResult<AuthorizationRequest> {
    let state = generate_state();
    let url = Url::parse_with_params(base, params.iter().chain([&("state", state.as_str())]))?;

    Ok(AuthorizationRequest {
        url: url.into(),
        state,
        code_verifier: None,
    })
}

/// То же, что `authorize_url`, плюс PKCE challenge; verifier возвращается вызывающему
pub fn authorize_url_with_pkce(
    base: &str,
    params: &[(&str, &str)],
) -> ConnectorResult<AuthorizationRequest> {
    let pkce = Pkce::generate();
    let mut all: Vec<(&str, &str)> = params.to_vec();
    all.push(("code_challenge", pkce.challenge.as_str()));
    all.push(("code_challenge_method", Pkce::METHOD));

    let mut request = authorize_url(base, &all)?;
    request.code_verifier = Some(pkce.verifier);
    Ok(request)
}

/// Склеивает скоупы; при пустом списке берутся значения по умолчанию платформы
pub fn join_scopes(scopes: &[String], defaults: &[&str], separator: &str) -> String {
    if scopes.is_empty() {
        defaults.join(separator)
    } else {
        scopes.join(separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_param(url: &str, key: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn state_is_128_bit_hex_and_fresh() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn known_pkce_challenge() {
        // RFC 7636, appendix B
        assert_eq!(
            Pkce::challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        let pkce = Pkce::generate();
        assert_eq!(pkce.verifier.len(), 43);
        assert_eq!(pkce.challenge, Pkce::challenge_for(&pkce.verifier));
    }

    #[test]
    fn authorize_url_appends_state() {
        let request = authorize_url(
            "https://example.com/oauth/authorize",
            &[("client_id", "abc"), ("redirect_uri", "https://app/cb")],
        )
        .unwrap();

        assert_eq!(query_param(&request.url, "client_id").as_deref(), Some("abc"));
        assert_eq!(query_param(&request.url, "redirect_uri").as_deref(), Some("https://app/cb"));
        assert_eq!(query_param(&request.url, "state"), Some(request.state.clone()));
        assert!(request.code_verifier.is_none());
    }

    #[test]
    fn pkce_url_carries_challenge_and_returns_verifier() {
        let request =
            authorize_url_with_pkce("https://example.com/authorize", &[("client_id", "abc")])
            .unwrap();
        let verifier = request.code_verifier.clone().unwrap();

        assert_eq!(
            query_param(&request.url, "code_challenge"),
            Some(Pkce::challenge_for(&verifier))
        );
        assert_eq!(query_param(&request.url, "code_challenge_method").as_deref(), Some("S256"));
    }

    #[test]
    fn scopes_fall_back_to_defaults() {
        assert_eq!(join_scopes(&[], &["identify", "guilds"], " "), "identify guilds");
        assert_eq!(join_scopes(&["a".into(), "b".into()], &["x"], ","), "a,b");
    }
}
