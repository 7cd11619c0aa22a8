/**
 * AWTECH KERNEL - Point d'entrée de la console d'administration des sites
 *
 * RÔLE : Orchestration de tous les modules : config, profils, passerelles
 * BD/SSH, catalogue d'opérations, dispatcher et API REST.
 *
 * ARCHITECTURE : API REST + catalogue fermé d'opérations + fan-out borné
 * vers les sites (postos/lojas) via PostgreSQL et SSH.
 * UTILITÉ : Point d'administration unique du parc de sites.
 */

mod catalog;
mod config;
mod db;
mod dispatch;
mod http;
mod metrics;
mod models;
mod profiles;
mod ssh;
mod state;

use crate::catalog::{default_catalog, Gateways};
use crate::config::load_config;
use crate::db::DbGateway;
use crate::dispatch::Dispatcher;
use crate::http::AppState;
use crate::profiles::{ProfileStore, SharedProfileStore};
use crate::ssh::SshExecutor;
use crate::state::new_state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas

    let cfg_loaded = load_config().await;
    let cfg = new_state(cfg_loaded.clone());

    // profils de sites, persistés en JSON
    let store: SharedProfileStore = Arc::new(ProfileStore::new(&cfg_loaded.profiles_file));
    if let Err(e) = store.load().await {
        eprintln!("[kernel] failed to load profiles: {}", e);
    }

    // passerelles partagées par toutes les opérations
    let gateways = Arc::new(Gateways {
        db: DbGateway::new(Duration::from_secs(cfg_loaded.probe_timeout_seconds)),
        ssh: SshExecutor::new(
            cfg_loaded.host_key_policy,
            Duration::from_secs(cfg_loaded.ssh_connect_timeout_seconds),
        ),
        store: store.clone(),
    });

    let catalog = Arc::new(default_catalog());
    println!("[kernel] {} operations in catalog", catalog.list().len());

    let dispatcher = Arc::new(Dispatcher::new(
        cfg_loaded.max_in_flight,
        Duration::from_secs(cfg_loaded.site_timeout_seconds),
        cfg_loaded.strict_sites,
    ));

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        cfg,
        store,
        catalog,
        gateways,
        dispatcher,
    };

    // HTTP
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg_loaded.port));
    println!("============================================================");
    println!("AWTECH GESTAO DE TI - BACKEND INICIADO");
    println!("[kernel] listening on http://{addr}");
    println!("============================================================");
    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
