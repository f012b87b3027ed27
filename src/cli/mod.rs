//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod model_list;
pub mod say;
pub mod serve;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::AuthManager;
use crate::core::backend::GenerationBackend;
use crate::core::catalog::ModelCatalog;
use crate::core::config::data::path_display;
use crate::core::config::settings::{resolve_api_key, ENV_API_KEY};
use crate::core::config::{ClientSettings, Config, ProxySettings};
use crate::core::conversation::ConversationController;
use crate::core::proxy_client::ProxyClient;
use crate::proxy::StreamingProxy;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_DESCRIBE"),
    ", ",
    env!("VERGEN_GIT_SHA"),
    ")"
);

#[derive(Parser)]
#[command(name = "polychat", version, long_version = LONG_VERSION)]
#[command(about = "Streaming multi-model chat and model-routing proxy")]
#[command(
    long_about = "polychat relays chat transcripts to OpenRouter-hosted models and streams \
the replies back token by token.\n\n\
Run 'polychat serve' to expose the proxy over HTTP (POST /api/chat), or \
'polychat chat' for an interactive terminal conversation.\n\n\
Authentication:\n\
  Use 'polychat auth' to store an API key in your system keyring.\n\n\
Environment Variables:\n\
  OPENROUTER_API_KEY     API key (takes precedence over the keyring)\n\
  POLYCHAT_BASE_URL      Upstream base URL (default https://openrouter.ai/api/v1)\n\
  NEXT_PUBLIC_SITE_URL   Sent as HTTP-Referer\n\
  POLYCHAT_APP_TITLE     Sent as X-Title\n\
  RUST_LOG               Log filter (logs go to stderr)\n\n\
Chat commands:\n\
  /retry            Regenerate the last reply\n\
  /reset            Start over with an empty transcript\n\
  /model <id>       Switch model for the next turn\n\
  /models           List available models\n\
  /quit             Exit\n\
  Ctrl+C            Stop the reply being generated"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use; must be one of `polychat models`
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Append finished turns to this file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP proxy
    Serve {
        /// Address to listen on (default 127.0.0.1:3000)
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },
    /// Start an interactive conversation (default)
    Chat {
        /// Talk to a running proxy instead of calling the upstream directly
        #[arg(long, value_name = "URL")]
        proxy: Option<String>,
    },
    /// Send one prompt and stream the reply to stdout
    Say {
        /// Talk to a running proxy instead of calling the upstream directly
        #[arg(long, value_name = "URL")]
        proxy: Option<String>,
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// List available models
    Models,
    /// Store an API key in the system keyring
    Auth,
    /// Remove the stored API key
    Deauth,
    /// Set a configuration value
    Set {
        /// Configuration key to set
        key: Option<String>,
        /// Value to set
        value: Option<String>,
    },
    /// Unset a configuration value
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config_path = args.config.as_deref();
    let command = args.command.unwrap_or(Commands::Chat { proxy: None });

    init_tracing(match command {
        Commands::Serve { .. } => "polychat=info",
        _ => "polychat=warn",
    });

    match command {
        Commands::Serve { listen } => {
            let config = Config::load(config_path)?;
            serve::run_serve(&config, listen).await
        }
        Commands::Chat { proxy } => {
            let config = Config::load(config_path)?;
            let controller = build_controller(&config, proxy, args.model.as_deref())?;
            chat::run_chat(controller, args.log).await
        }
        Commands::Say { proxy, prompt } => {
            let config = Config::load(config_path)?;
            let controller = build_controller(&config, proxy, args.model.as_deref())?;
            say::run_say(controller, prompt.join(" ")).await
        }
        Commands::Models => {
            let config = Config::load(config_path)?;
            let catalog = ModelCatalog::builtin()?;
            model_list::list_models(&catalog, config.default_model.as_deref());
            Ok(())
        }
        Commands::Auth => {
            AuthManager::new().interactive_auth()?;
            Ok(())
        }
        Commands::Deauth => {
            AuthManager::new().interactive_deauth()?;
            Ok(())
        }
        Commands::Set { key, value } => run_set(config_path, key, value),
        Commands::Unset { key } => {
            let mut config = Config::load(config_path)?;
            config.unset_value(&key)?;
            let saved = config.save(config_path)?;
            println!("✅ Unset {key} in {}", path_display(&saved));
            Ok(())
        }
    }
}

fn run_set(
    config_path: Option<&Path>,
    key: Option<String>,
    value: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load(config_path)?;
    match (key, value) {
        (Some(key), Some(value)) => {
            config.set_value(&key, &value)?;
            let saved = config.save(config_path)?;
            println!("✅ Set {key} to: {value} ({})", path_display(&saved));
        }
        _ => config.print_all(),
    }
    Ok(())
}

fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Upstream settings for an in-process proxy. Fails when no API key is set.
pub(crate) fn resolve_proxy_settings(config: &Config) -> Result<ProxySettings, Box<dyn Error>> {
    let auth = AuthManager::new();
    let api_key = resolve_api_key(std::env::var(ENV_API_KEY).ok(), || Ok(auth.get_token()?))?;
    Ok(ProxySettings::resolve(config, api_key))
}

fn build_controller(
    config: &Config,
    proxy_flag: Option<String>,
    model_flag: Option<&str>,
) -> Result<ConversationController, Box<dyn Error>> {
    let client_settings = ClientSettings::from_config(config);
    let catalog = Arc::new(ModelCatalog::builtin()?);

    let backend: Arc<dyn GenerationBackend> = match proxy_flag.or(client_settings.proxy_url) {
        Some(proxy_url) => Arc::new(ProxyClient::new(reqwest::Client::new(), &proxy_url)),
        None => {
            let settings = resolve_proxy_settings(config)?;
            Arc::new(StreamingProxy::new(Arc::new(settings), Arc::clone(&catalog)))
        }
    };

    let mut controller = ConversationController::new(backend, catalog);
    if let Some(model) = model_flag.or(client_settings.default_model.as_deref()) {
        controller.select_model(model)?;
    }
    Ok(controller)
}
