//! Построение строк заголовков `Name: value` для запросов к платформам

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderName, HeaderValue};
use tracing::warn;

pub const ACCEPT_JSON: &str = "Accept: application/json";

pub fn bearer(token: &str) -> String {
    format!("Authorization: Bearer {}", token)
}

pub fn bot(token: &str) -> String {
    format!("Authorization: Bot {}", token)
}

pub fn basic(username: &str, password: &str) -> String {
    let credentials = STANDARD.encode(format!("{}:{}", username, password));
    format!("Authorization: Basic {}", credentials)
}

pub fn named(name: &str, value: impl std::fmt::Display) -> String {
    format!("{}: {}", name, value)
}

/// Разбирает строку заголовка; строки без двоеточия и с недопустимыми символами пропускаются
pub fn parse_line(line: &str) -> Option<(HeaderName, HeaderValue)> {
    let Some((name, value)) = line.split_once(':') else {
        warn!("Skipping malformed header line: {}", line);
        return None;
    };

    let name = match HeaderName::from_bytes(name.trim().as_bytes()) {
        Ok(name) => name,
        Err(e) => {
            warn!("Skipping header with invalid name {:?}: {}", name, e);
            return None;
        }
    };

    match HeaderValue::from_str(value.trim()) {
        Ok(value) => Some((name, value)),
        Err(e) => {
            warn!("Skipping header {} with invalid value: {}", name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_auth_lines() {
        assert_eq!(bearer("abc"), "Authorization: Bearer abc");
        assert_eq!(bot("xyz"), "Authorization: Bot xyz");
        // base64("id:secret")
        assert_eq!(basic("id", "secret"), "Authorization: Basic aWQ6c2VjcmV0");
    }

    #[test]
    fn parses_and_trims() {
        let (name, value) = parse_line("LinkedIn-Version:  202401 ").unwrap();
        assert_eq!(name.as_str(), "linkedin-version");
        assert_eq!(value.to_str().unwrap(), "202401");
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_line("no colon here").is_none());
        assert!(parse_line("bad name: value").is_none());
    }
}
