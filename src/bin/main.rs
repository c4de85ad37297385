use actix_web::{middleware, web, App, HttpServer};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use microblog::config::Config;
use microblog::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("microblog=info,actix_web=info")),
        )
        .init();

    let config = Config::from_env();
    let bind_addr = config.bind_addr.clone();
    let state = web::Data::new(AppState::new(config).await?);

    tracing::info!(
        addr = %bind_addr,
        translator = state.config.translator_key.is_some(),
        mail = state.mailer.is_enabled(),
        "server listening"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(microblog::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}
