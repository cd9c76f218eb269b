use std::net::SocketAddr;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::User;
use teloxide::update_listeners::webhooks;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use startup_advisor::advisor::{self, AdvisorConfig, AdvisorEngine, TelegramClient, UserProfile};
use startup_advisor::config::Config;
use startup_advisor::openrouter;
use startup_advisor::persona::Persona;
use startup_advisor::ratelimit::RateLimiter;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Startup advisor commands:")]
enum Command {
    #[command(description = "choose your advisor")]
    Start,
    #[command(description = "switch to Product Manager")]
    Pm,
    #[command(description = "switch to VC/Angel Investor")]
    Vc,
    #[command(description = "clear conversation history")]
    Reset,
    #[command(description = "view your usage stats")]
    Stats,
    #[command(description = "show help")]
    Help,
    #[command(description = "download your conversation")]
    Export,
}

struct BotState {
    engine: AdvisorEngine,
}

fn profile(user: &User) -> UserProfile {
    UserProfile {
        user_id: user.id.0.to_string(),
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()),
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "advisor.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::never(&log_dir, "advisor.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting startup advisor...");
    info!("Loaded config from {config_path}");

    let store = match advisor::open_store(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to open conversation store: {e}");
            std::process::exit(1);
        }
    };
    info!("Conversation store: {}", store.backend_name());

    let llm = match openrouter::Client::new(config.openrouter_api_key.clone()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build OpenRouter client: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register commands: {e}");
    }

    let limiter = RateLimiter::new(config.rate_limit_messages, config.rate_limit_window);
    info!(
        "Rate limit: {} messages per {}s",
        config.rate_limit_messages,
        config.rate_limit_window.as_secs()
    );

    let engine = AdvisorEngine::new(
        AdvisorConfig {
            max_history_messages: config.max_history_messages,
            summary_model: config.summary_model.clone(),
            summary_every: config.summary_every,
            format: config.format,
            feedback_contact: config.feedback_contact.clone(),
        },
        store,
        llm,
        limiter,
        TelegramClient::new(bot.clone(), config.max_message_length),
    );
    let state = Arc::new(BotState { engine });

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
                .branch(dptree::endpoint(handle_text)),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    match config.webhook_url {
        Some(ref base) => {
            let url = match format!("{}/webhook", base.trim_end_matches('/')).parse::<reqwest::Url>() {
                Ok(u) => u,
                Err(e) => {
                    error!("Invalid webhook_url {base}: {e}");
                    std::process::exit(1);
                }
            };
            let addr = SocketAddr::from(([0, 0, 0, 0], config.webhook_port));
            info!("Webhook mode on {addr}, public URL {url}");
            let listener = match webhooks::axum(bot, webhooks::Options::new(addr, url)).await {
                Ok(l) => l,
                Err(e) => {
                    error!("Failed to set up webhook: {e}");
                    std::process::exit(1);
                }
            };
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("Error from the update listener"),
                )
                .await;
        }
        None => {
            info!("Polling mode");
            dispatcher.dispatch().await;
        }
    }
}

async fn handle_command(msg: Message, cmd: Command, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(ref user) = msg.from else {
        return Ok(());
    };
    let user = profile(user);
    let chat_id = msg.chat.id.0;
    let engine = &state.engine;

    match cmd {
        Command::Start => engine.start(chat_id, &user).await,
        Command::Pm => engine.switch_persona(chat_id, &user, Persona::ProductManager).await,
        Command::Vc => engine.switch_persona(chat_id, &user, Persona::Investor).await,
        Command::Reset => engine.reset(chat_id, &user).await,
        Command::Stats => engine.stats(chat_id, &user).await,
        Command::Help => engine.help(chat_id).await,
        Command::Export => engine.export_menu(chat_id).await,
    }
    Ok(())
}

async fn handle_text(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let (Some(user), Some(text)) = (msg.from.as_ref(), msg.text()) else {
        return Ok(());
    };
    // Unknown commands are ignored rather than sent to the model.
    if text.starts_with('/') {
        return Ok(());
    }
    let preview: String = text.chars().take(100).collect();
    info!("Message from {} ({}): \"{preview}\"", user.first_name, user.id);

    state
        .engine
        .handle_message(msg.chat.id.0, &profile(user), text)
        .await;
    Ok(())
}

async fn handle_callback(q: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    let engine = &state.engine;
    let user = profile(&q.from);
    let message = q.regular_message();
    // Private chats share the user's id.
    let chat_id = message.map_or(q.from.id.0 as i64, |m| m.chat.id.0);
    let message_id = message.map(|m| m.id.0);
    let data = q.data.clone().unwrap_or_default();

    engine.answer_callback(q.id.clone()).await;

    if let Some(tag) = data.strip_prefix("select_") {
        match Persona::from_tag(tag) {
            Some(persona) => engine.select_persona(chat_id, message_id, &user, persona).await,
            None => warn!("Unknown persona in callback: {data}"),
        }
    } else if data == "export_markdown" {
        engine.export_markdown(chat_id, message_id, &user).await;
    } else {
        warn!("Unknown callback data: {data}");
    }
    Ok(())
}
