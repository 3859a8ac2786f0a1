use crate::error::{ConnectorError, ConnectorResult};
use crate::http::DEFAULT_TIMEOUT_SECS;
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[value(name = "discord")]
    Discord,
    #[value(name = "facebook")]
    Facebook,
    #[value(name = "instagram")]
    Instagram,
    #[value(name = "linkedin")]
    Linkedin,
    #[value(name = "medium")]
    Medium,
    #[value(name = "pinterest")]
    Pinterest,
    #[value(name = "reddit")]
    Reddit,
    #[value(name = "slack")]
    Slack,
    #[value(name = "telegram")]
    Telegram,
    #[value(name = "tiktok")]
    Tiktok,
    #[value(name = "twitter")]
    Twitter,
    #[value(name = "wordpress")]
    Wordpress,
    #[value(name = "youtube")]
    Youtube,
}

impl Platform {
    pub const ALL: [Platform; 13] = [
        Platform::Discord,
        Platform::Facebook,
        Platform::Instagram,
        Platform::Linkedin,
        Platform::Medium,
        Platform::Pinterest,
        Platform::Reddit,
        Platform::Slack,
        Platform::Telegram,
        Platform::Tiktok,
        Platform::Twitter,
        Platform::Wordpress,
        Platform::Youtube,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Discord => "discord",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Linkedin => "linkedin",
            Platform::Medium => "medium",
            Platform::Pinterest => "pinterest",
            Platform::Reddit => "reddit",
            Platform::Slack => "slack",
            Platform::Telegram => "telegram",
            Platform::Tiktok => "tiktok",
            Platform::Twitter => "twitter",
            Platform::Wordpress => "wordpress",
            Platform::Youtube => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|platform| platform.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConnectorError::Config(format!("Unknown platform: {}", s)))
    }
}

pub fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Разбирает настройки платформы в типизированную структуру.
///
/// Отсутствие обязательных полей является ошибкой конструирования коннектора.
pub fn parse_settings<T: DeserializeOwned>(
    platform: Platform,
    settings: &Value,
) -> ConnectorResult<T> {
    serde_json::from_value(settings.clone())
        .map_err(|e| ConnectorError::Config(format!("Invalid {} settings: {}", platform, e)))
}

/// Общие проверки: таймаут и базовые URL
pub fn validate_common<S: AsRef<str>>(
    platform: Platform,
    timeout_secs: u64,
    urls: &[S],
) -> ConnectorResult<()> {
    if timeout_secs == 0 {
        return Err(ConnectorError::Config(format!(
            "{}: timeout_secs must be greater than zero",
            platform
        )));
    }

    for url in urls {
        let url = url.as_ref();
        url::Url::parse(url)
            .map_err(|e| {
                ConnectorError::Config(format!("{}: invalid URL {:?}: {}", platform, url, e))
            })?;
    }

    Ok(())
}

pub fn all_present<S: AsRef<str>>(fields: &[S]) -> bool {
    fields.iter().all(|field| !field.as_ref().trim().is_empty())
}

/// Настройки всех платформ, переданные внешним слоем: `{"discord": {...}, ...}`
#[derive(Debug, Clone, Default)]
pub struct ConnectorSettings {
    platforms: HashMap<Platform, Value>,
}

impl ConnectorSettings {
    pub fn from_value(value: Value) -> ConnectorResult<Self> {
        let Value::Object(entries) = value else {
            return Err(ConnectorError::Config(
                "Connector settings must be a JSON object keyed by platform".to_string(),
            ));
        };

        let mut platforms = HashMap::new();
        for (key, settings) in entries {
            let platform: Platform = key.parse()?;
            platforms.insert(platform, settings);
        }

        debug!("Loaded settings for {} platform(s)", platforms.len());
        Ok(ConnectorSettings { platforms })
    }

    pub fn load(path: &Path) -> ConnectorResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_value(serde_json::from_str(&raw)?)
    }

    pub fn insert(&mut self, platform: Platform, settings: Value) {
        self.platforms.insert(platform, settings);
    }

    pub fn get(&self, platform: Platform) -> Option<&Value> {
        self.platforms.get(&platform)
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.platforms.keys().copied()
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "socon")]
#[command(author = "Dabe Vlohn")]
#[command(version = "0.2.0")]
#[command(about = "Uniform connector layer for social and content platforms")]
pub struct Cli {
    /// JSON-файл с настройками платформ
    /// env: SOCON_CONFIG
    #[arg(long, env = "SOCON_CONFIG", default_value = "socon.json")]
    pub config: PathBuf,

    /// Платформа
    /// env: SOCON_PLATFORM
    #[arg(long, env = "SOCON_PLATFORM", value_enum)]
    pub platform: Option<Platform>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Показать платформы и их возможности
    Platforms,

    /// Сформировать URL авторизации OAuth
    AuthUrl {
        #[arg(long)]
        redirect_uri: String,
        /// Скоупы через запятую; по умолчанию скоупы платформы
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
    },

    /// Обменять код авторизации на токен
    Token {
        #[arg(long)]
        code: String,
        #[arg(long)]
        redirect_uri: String,
        /// PKCE verifier, выданный вместе с URL авторизации
        #[arg(long)]
        code_verifier: Option<String>,
    },

    /// Обновить токен
    Refresh {
        #[arg(long, env = "SOCON_REFRESH_TOKEN")]
        refresh_token: String,
    },

    /// Профиль авторизованного аккаунта
    Profile {
        #[arg(long, env = "SOCON_TOKEN")]
        token: String,
    },

    /// Опубликовать пост
    Publish {
        #[arg(long, env = "SOCON_TOKEN")]
        token: String,
        #[arg(long)]
        text: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        link: Option<String>,
        #[arg(long)]
        image: Vec<String>,
        #[arg(long)]
        video: Vec<String>,
        /// Параметры платформы в виде key=value
        #[arg(long = "option", value_parser = parse_key_value)]
        options: Vec<(String, String)>,
    },

    /// Удалить пост
    Delete {
        #[arg(long, env = "SOCON_TOKEN")]
        token: String,
        #[arg(long)]
        post_id: String,
    },

    /// Показать текущее состояние лимитов после запроса профиля
    RateLimits {
        #[arg(long, env = "SOCON_TOKEN")]
        token: String,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}
