use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use chanlink_core::{
    commands::{LinkCommands, LINK_COMMAND},
    config::Config,
    domain,
    endpoints::{EndpointCache, EndpointProfile},
    pairing::{PairingConfig, PairingRegistry},
    ports::{ConfirmPrompt, RelayPlatform},
    relay::{RelayConfig, RelayDispatcher},
    store::{SqliteEndpointStore, SqliteGroupStore, SqlitePool},
};

use crate::{confirm::TelegramConfirm, handlers, TelegramPlatform};

pub const HELP_COMMAND: &str = "help";
pub const START_COMMAND: &str = "start";

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub commands: Arc<LinkCommands>,
    pub relay: Arc<RelayDispatcher>,
    pub confirm: Arc<TelegramConfirm>,
}

pub async fn run_polling(cfg: Arc<Config>, pool: SqlitePool) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let me = bot.get_me().await?;
    info!(username = %me.username(), "chanlink started");

    let profile = EndpointProfile {
        name: cfg
            .endpoint_name
            .clone()
            .unwrap_or_else(|| format!("{} - Link", me.username())),
        avatar: load_avatar(&cfg).await,
    };

    let platform: Arc<dyn RelayPlatform> =
        Arc::new(TelegramPlatform::new(bot.clone(), me.user.id));
    let groups = Arc::new(SqliteGroupStore::new(pool.clone()));
    let endpoints = Arc::new(EndpointCache::new(
        platform.clone(),
        Arc::new(SqliteEndpointStore::new(pool)),
        profile,
    ));
    let confirm = Arc::new(TelegramConfirm::new(bot.clone(), cfg.confirm_timeout));

    let registry = PairingRegistry::new(PairingConfig {
        code_length: cfg.pairing_code_length,
        ttl: cfg.pairing_code_ttl,
        max_attempts: cfg.pairing_max_attempts,
    });
    let commands = Arc::new(LinkCommands::new(
        registry,
        groups.clone(),
        endpoints.clone(),
        platform.clone(),
        confirm.clone() as Arc<dyn ConfirmPrompt>,
        cfg.command_prefix.clone(),
    ));

    let relay = Arc::new(RelayDispatcher::new(
        groups,
        endpoints,
        platform,
        RelayConfig {
            delivery_timeout: cfg.delivery_timeout,
            command_prefix: cfg.command_prefix.clone(),
            command_names: vec![
                LINK_COMMAND.to_string(),
                HELP_COMMAND.to_string(),
                START_COMMAND.to_string(),
            ],
            own_user_id: Some(domain::UserId(me.user.id.0 as i64)),
        },
    ));

    let state = Arc::new(AppState {
        cfg,
        commands,
        relay,
        confirm,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn load_avatar(cfg: &Config) -> Option<Vec<u8>> {
    let path = cfg.endpoint_avatar_path.as_ref()?;
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read endpoint avatar");
            None
        }
    }
}
