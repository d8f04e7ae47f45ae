pub mod auth;
pub mod codec;
pub mod config;
pub mod db;
pub mod expirer;
pub mod handlers;
pub mod hub;
pub mod invite;
pub mod models;
pub mod protocol;
pub mod rate_limit;
pub mod session;
pub mod store;

use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use rocket_cors::{AllowedOrigins, CorsOptions};

use auth::Authenticator;
use codec::ContentCodec;
use config::Config;
use db::Db;
use hub::Hub;
use invite::InviteTokens;
use rate_limit::RateLimiter;

/// Everything a handler can touch, cheaply cloneable across tasks.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub hub: Arc<Hub>,
    pub config: Arc<Config>,
    pub codec: Arc<ContentCodec>,
    pub auth: Arc<Authenticator>,
    pub invites: Arc<InviteTokens>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Db::new(&config.db_path);
        let codec = ContentCodec::new(&config.content_key);
        let auth = Authenticator::new(&config.token_key, config.token_lifetime_secs);
        let invites = InviteTokens::new(&config.invite_key);
        AppState {
            db: Arc::new(db),
            hub: Arc::new(Hub::new()),
            codec: Arc::new(codec),
            auth: Arc::new(auth),
            invites: Arc::new(invites),
            limiter: Arc::new(RateLimiter::new()),
            config: Arc::new(config),
        }
    }
}

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    rocket_with_config(config)
}

pub fn rocket_with_config(config: Config) -> rocket::Rocket<rocket::Build> {
    build_rocket(AppState::new(config))
}

pub fn build_rocket(state: AppState) -> rocket::Rocket<rocket::Build> {
    // Exact origins go to the CORS layer too; wildcard suffixes are only
    // enforceable at the WS upgrade gate.
    let origins = &state.config.allowed_origins;
    let cors_options = if !origins.is_empty() && origins.iter().all(|o| !o.contains('*')) {
        CorsOptions::default().allowed_origins(AllowedOrigins::some_exact(origins))
    } else {
        CorsOptions::default()
    };
    let cors = cors_options.to_cors().expect("Failed to create CORS");

    let expirer_db_path = state.config.db_path.clone();
    let expirer_interval = state.config.expire_interval_secs;

    rocket::build()
        .manage(state)
        .attach(cors)
        .mount("/api/v1", rocket::routes![session::chat_ws, health])
        .attach(rocket::fairing::AdHoc::on_liftoff("Expirer", move |_rocket| {
            Box::pin(async move {
                expirer::spawn_expirer(expirer_db_path, expirer_interval);
                log::info!("expirer started");
            })
        }))
}

#[rocket::get("/health")]
fn health(state: &State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "build": env!("CARGO_PKG_VERSION"),
        "sessions": state.hub.session_count(),
    }))
}
