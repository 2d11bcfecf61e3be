use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use tracing_subscriber::EnvFilter;

use opensplit_settle::mongo::MongoStore;
use opensplit_settle::routes;
use opensplit_settle::service::SettlementService;
use opensplit_settle::settings::{self, Backend, Settings};
use opensplit_settle::store::{LedgerStore, MemoryStore};
use opensplit_settle::{Error, Result};

async fn open_store(settings: &settings::Store) -> Result<Arc<dyn LedgerStore>> {
    match settings.backend {
        Backend::Memory => {
            tracing::warn!("using the in-memory store, nothing will be persisted");
            let store = match &settings.seed {
                Some(path) => MemoryStore::load(path)?,
                None => {
                    tracing::warn!("no store.seed given, starting without any group");
                    MemoryStore::new()
                }
            };
            tracing::info!("loaded {} groups", store.group_count().await);
            Ok(Arc::new(store))
        }
        Backend::Mongo => {
            let uri = settings.uri.as_deref().ok_or_else(|| {
                Error::Config(config::ConfigError::NotFound("store.uri".to_string()))
            })?;
            tracing::info!("Using the following URI: {uri}");
            let store = MongoStore::connect(uri, &settings.database).await?;
            tracing::info!("Connected");
            Ok(Arc::new(store))
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("opensplit_settle={}", settings.log.level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = open_store(&settings.store).await?;
    let service = web::Data::new(SettlementService::new(
        store,
        settings.settlement.epsilon(),
    ));

    let bind = (settings.server.bind.clone(), settings.server.port);
    tracing::info!("listening on {}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(service.clone())
            .configure(routes::configure)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
