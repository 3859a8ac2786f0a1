use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use socon::config::{Cli, Command};
use socon::models::{MediaItem, Options, PostContent};
use socon::{Connector, ConnectorSettings, Platform};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Инициализируем логирование
    init_tracing()?;

    // Парсим аргументы из CLI и env
    let cli = Cli::parse();

    let settings = load_settings(&cli)?;

    if let Command::Platforms = cli.command {
        return print_json(&platforms_overview(&settings));
    }

    let Some(platform) = cli.platform else {
        bail!("--platform (or SOCON_PLATFORM) is required for this command");
    };
    let connector = settings
        .connector(platform)
        .with_context(|| format!("Failed to build {} connector", platform))?;

    if !connector.is_configured() {
        warn!("{} connector is missing credentials", platform);
    }
    info!("Running {} against {}", command_name(&cli.command), platform);

    run(connector.as_ref(), cli.command).await
}

async fn run(connector: &dyn Connector, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Platforms => bail!("platforms does not take a connector"),

        Command::AuthUrl { redirect_uri, scopes } => {
            print_json(&connector.authorization_url(&redirect_uri, &scopes)?)
        }

        Command::Token {
            code,
            redirect_uri,
            code_verifier,
        } => {
            let token = connector
                .access_token(&code, &redirect_uri, code_verifier.as_deref())
                .await?;
            print_json(&token)
        }

        Command::Refresh { refresh_token } => {
            print_json(&connector.refresh_token(&refresh_token).await?)
        }

        Command::Profile { token } => print_json(&connector.profile(&token).await?),

        Command::Publish {
            token,
            text,
            title,
            link,
            image,
            video,
            options,
        } => {
            let mut content = PostContent::text(text);
            content.title = title;
            content.link = link;
            content.media.extend(image.into_iter().map(MediaItem::image));
            content.media.extend(video.into_iter().map(MediaItem::video));

            let options = options
                .into_iter()
                .fold(Options::new(), |options, (key, value)| options.with(&key, value));

            print_json(&connector.publish_post(&token, &content, &options).await?)
        }

        Command::Delete { token, post_id } => {
            let outcome = connector.delete_post(&token, &post_id).await?;
            print_json(&outcome.to_json()?)
        }

        Command::RateLimits { token } => {
            // Лимиты появляются только после ответа платформы
            if let Err(e) = connector.profile(&token).await {
                warn!("Profile request failed: {}", e);
            }
            print_json(&connector.rate_limits())
        }
    }
}

/// Файл настроек необязателен для `platforms`
fn load_settings(cli: &Cli) -> anyhow::Result<ConnectorSettings> {
    if !cli.config.exists() {
        if let Command::Platforms = cli.command {
            return Ok(ConnectorSettings::default());
        }
        bail!("Settings file not found: {}", cli.config.display());
    }

    ConnectorSettings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))
}

fn platforms_overview(settings: &ConnectorSettings) -> Vec<Value> {
    Platform::ALL
        .into_iter()
        .map(|platform| match settings.connector(platform) {
            Ok(connector) => json!({
                "platform": connector.platform_name(),
                "type": connector.platform_type(),
                "content_types": connector.supported_content_types(),
                "configured": connector.is_configured(),
            }),
            Err(e) => {
                if settings.get(platform).is_some() {
                    warn!("Invalid settings for {}: {}", platform, e);
                }
                json!({ "platform": platform.as_str(), "configured": false })
            }
        })
        .collect()
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Platforms => "platforms",
        Command::AuthUrl { .. } => "auth-url",
        Command::Token { .. } => "token",
        Command::Refresh { .. } => "refresh",
        Command::Profile { .. } => "profile",
        Command::Publish { .. } => "publish",
        Command::Delete { .. } => "delete",
        Command::RateLimits { .. } => "rate-limits",
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Инициализирует систему логирования с использованием tracing
fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout занят JSON-результатом, логи идут в stderr
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .init();

    info!("Tracing initialized");
    Ok(())
}
