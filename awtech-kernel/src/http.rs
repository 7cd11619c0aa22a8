/**
 * API REST AWTECH - Serveur HTTP principal de la console
 *
 * RÔLE :
 * Expose l'API REST de la console d'administration des sites (postos/lojas).
 * Interface entre le frontend de gestion et les passerelles BD/SSH.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum avec middleware auth API key
 * - Routes organisées : /health, /api/profiles, /api/test, /api/operations,
 *   /api/monitoring
 * - Les opérations passent toutes par le catalogue : validation des
 *   paramètres puis exécution mono-site ou fan-out via le dispatcher
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - Validation côté middleware avant traitement métier
 * - Messages utilisateur en portugais (convention du frontend)
 */

use crate::catalog::{collect_health, record_tofu_fingerprint, Gateways, OpParams, OperationCatalog};
use crate::config::ConsoleConfig;
use crate::dispatch::{DispatchError, Dispatcher, SiteOutcome};
use crate::metrics::HealthSnapshot;
use crate::models::{truncate_diag, OperationResult};
use crate::profiles::{ProfilesMap, SharedProfileStore, SiteProfile};
use crate::state::Shared;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Health check toujours accessible
    if path.starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("AWTECH_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        eprintln!("SECURITY: AWTECH_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Shared<ConsoleConfig>,
    pub store: SharedProfileStore,
    pub catalog: Arc<OperationCatalog>,
    pub gateways: Arc<Gateways>,
    pub dispatcher: Arc<Dispatcher>,
}

#[derive(Debug, Deserialize)]
struct SaveProfileRequest {
    name: Option<String>,
    #[serde(flatten)]
    profile: SiteProfile,
}

#[derive(Debug, Deserialize)]
struct ProfileRef {
    profile_name: String,
}

#[derive(Debug, Deserialize)]
struct OperationRequest {
    profile_name: Option<String>,
    profiles: Option<Vec<String>>,
    #[serde(flatten)]
    params: OpParams,
}

#[derive(Debug, Deserialize)]
struct MonitoringRequest {
    #[serde(default)]
    profiles: Vec<String>,
}

fn error_json(msg: impl Into<String>) -> Json<Value> {
    Json(json!({ "error": msg.into() }))
}

fn message_json(msg: impl Into<String>) -> Json<Value> {
    Json(json!({ "message": msg.into() }))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/profiles", get(get_profiles).post(save_profile))
        .route("/api/profiles/{name}", axum::routing::delete(delete_profile))
        .route("/api/test/db", post(test_db))
        .route("/api/test/ssh", post(test_ssh))
        .route("/api/test/all", post(test_all))
        .route("/api/operations", get(list_operations))
        .route("/api/operations/{name}", post(run_operation))
        .route("/api/monitoring/data", post(monitoring_data))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
        .layer(CorsLayer::permissive())
}

// GET /api/profiles (liste complète)
async fn get_profiles(State(app): State<AppState>) -> Json<ProfilesMap> {
    Json(app.store.list().await)
}

// POST /api/profiles (remplacement intégral, pas de merge)
async fn save_profile(
    State(app): State<AppState>,
    Json(body): Json<SaveProfileRequest>,
) -> (StatusCode, Json<Value>) {
    let Some(name) = body.name.filter(|n| !n.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, error_json("Nome do perfil é obrigatório"));
    };
    match app.store.put(&name, body.profile).await {
        Ok(()) => (
            StatusCode::OK,
            message_json(format!("Perfil {name} salvo com sucesso!")),
        ),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_json(e.to_string())),
    }
}

// DELETE /api/profiles/{name}
async fn delete_profile(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match app.store.delete(&name).await {
        Ok(true) => (StatusCode::OK, message_json(format!("Perfil {name} excluído!"))),
        Ok(false) => (StatusCode::NOT_FOUND, error_json("Perfil não encontrado")),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_json(e.to_string())),
    }
}

// POST /api/test/db (probe de connexion PostgreSQL)
async fn test_db(
    State(app): State<AppState>,
    Json(body): Json<ProfileRef>,
) -> (StatusCode, Json<Value>) {
    let Some(profile) = app.store.get(&body.profile_name).await else {
        return (StatusCode::NOT_FOUND, error_json("Perfil não encontrado"));
    };
    match app.gateways.db.probe(&profile).await {
        Ok(()) => (
            StatusCode::OK,
            message_json(format!("Conexão com {} bem-sucedida!", body.profile_name)),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_json(format!("Falha na conexão: {e}")),
        ),
    }
}

// POST /api/test/ssh (probe SSH ; enregistre l'empreinte en mode TOFU)
async fn test_ssh(
    State(app): State<AppState>,
    Json(body): Json<ProfileRef>,
) -> (StatusCode, Json<Value>) {
    let Some(profile) = app.store.get(&body.profile_name).await else {
        return (StatusCode::NOT_FOUND, error_json("Perfil não encontrado"));
    };
    match app.gateways.ssh.probe(&profile).await {
        Ok(fingerprint) => {
            record_tofu_fingerprint(&app.gateways, &body.profile_name, fingerprint.as_deref())
                .await;
            (
                StatusCode::OK,
                Json(json!({
                    "message": format!("Conexão SSH com {} bem-sucedida!", body.profile_name),
                    "fingerprint": fingerprint,
                })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_json(format!("Falha SSH: {e}")),
        ),
    }
}

// POST /api/test/all (probes BD + SSH de tous les profils, en parallèle)
async fn test_all(State(app): State<AppState>) -> (StatusCode, Json<Value>) {
    let mut names: Vec<String> = app.store.list().await.into_keys().collect();
    names.sort_unstable();

    let gw = app.gateways.clone();
    let report = app
        .dispatcher
        .dispatch(&names, &app.store, move |name, profile| {
            let gw = gw.clone();
            async move {
                let db_result = match gw.db.probe(&profile).await {
                    Ok(()) => "BD OK".to_string(),
                    Err(e) => format!("BD: {}", truncate_diag(&e.to_string(), 40)),
                };
                let ssh_result = match gw.ssh.probe(&profile).await {
                    Ok(_) => "SSH OK".to_string(),
                    Err(crate::ssh::SshError::NotConfigured) => "SSH N/C".to_string(),
                    Err(e) => format!("SSH: {}", truncate_diag(&e.to_string(), 40)),
                };
                format!("{name}: {db_result} | {ssh_result}")
            }
        })
        .await;

    let report = match report {
        Ok(r) => r,
        Err(e) => return (StatusCode::NOT_FOUND, error_json(e.to_string())),
    };

    let mut results: Vec<String> = report
        .results
        .into_iter()
        .map(|(name, outcome)| match outcome {
            SiteOutcome::Done(line) => line,
            SiteOutcome::TimedOut { after } => {
                format!("{name}: sem resposta após {}s", after.as_secs())
            }
            SiteOutcome::Failed(e) => format!("{name}: erro interno ({e})"),
        })
        .collect();
    results.sort_unstable();
    (StatusCode::OK, Json(json!({ "results": results })))
}

// GET /api/operations (noms du catalogue)
async fn list_operations(State(app): State<AppState>) -> Json<Vec<&'static str>> {
    Json(app.catalog.list())
}

// POST /api/operations/{name} (exécution mono-site ou fan-out)
async fn run_operation(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<OperationRequest>,
) -> (StatusCode, Json<Value>) {
    let Some(op) = app.catalog.get(&name) else {
        return (
            StatusCode::NOT_FOUND,
            error_json(format!("Operação desconhecida: {name}")),
        );
    };
    if let Err(msg) = op.validate(&body.params) {
        return (StatusCode::BAD_REQUEST, error_json(msg));
    }

    let site_timeout = Duration::from_secs(app.cfg.lock().site_timeout_seconds);

    // mono-site : réponse brute de l'opération, 500 en cas d'échec
    if let Some(site) = body.profile_name {
        let Some(profile) = app.store.get(&site).await else {
            return (StatusCode::NOT_FOUND, error_json("Perfil não encontrado"));
        };
        let result = match tokio::time::timeout(
            site_timeout,
            op.run(&site, &profile, &body.params, &app.gateways),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => OperationResult::failure(
                &site,
                "Tempo esgotado",
                format!("sem resposta após {}s", site_timeout.as_secs()),
            ),
        };
        let code = if result.ok { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
        return (code, Json(json!(result)));
    }

    // fan-out : toujours 200, une issue par site dans le corps
    let Some(names) = body.profiles.filter(|p| !p.is_empty()) else {
        return (StatusCode::BAD_REQUEST, error_json("Perfil não especificado"));
    };

    let catalog = app.catalog.clone();
    let gw = app.gateways.clone();
    let op_name = name.clone();
    let params = body.params.clone();
    let report = app
        .dispatcher
        .dispatch(&names, &app.store, move |site, profile| {
            let catalog = catalog.clone();
            let gw = gw.clone();
            let op_name = op_name.clone();
            let params = params.clone();
            async move {
                match catalog.get(&op_name) {
                    Some(op) => op.run(&site, &profile, &params, &gw).await,
                    None => OperationResult::failure(&site, "Operação desconhecida", op_name),
                }
            }
        })
        .await;

    let report = match report {
        Ok(r) => r,
        Err(e @ DispatchError::UnknownSites(_)) => {
            return (StatusCode::NOT_FOUND, error_json(e.to_string()));
        }
    };

    let results: HashMap<String, OperationResult> = report
        .results
        .into_iter()
        .map(|(site, outcome)| {
            let result = match outcome {
                SiteOutcome::Done(result) => result,
                SiteOutcome::TimedOut { after } => OperationResult::failure(
                    &site,
                    "Tempo esgotado",
                    format!("sem resposta após {}s", after.as_secs()),
                ),
                SiteOutcome::Failed(e) => OperationResult::failure(&site, "Erro interno", e),
            };
            (site, result)
        })
        .collect();
    (
        StatusCode::OK,
        Json(json!({ "results": results, "skipped": report.skipped })),
    )
}

// POST /api/monitoring/data (snapshot de santé des postos sélectionnés)
async fn monitoring_data(
    State(app): State<AppState>,
    Json(body): Json<MonitoringRequest>,
) -> Json<HashMap<String, HealthSnapshot>> {
    // seuls les postos connus sont monitorés, les lojas et les noms
    // inconnus sont ignorés (comportement du tableau de bord)
    let mut names = Vec::new();
    for name in &body.profiles {
        if let Some(profile) = app.store.get(name).await {
            if profile.tipo_posto {
                names.push(name.clone());
            }
        }
    }

    let gw = app.gateways.clone();
    let report = app
        .dispatcher
        .dispatch(&names, &app.store, move |_name, profile| {
            let gw = gw.clone();
            async move { collect_health(&profile, &gw).await }
        })
        .await;

    let mut data = HashMap::new();
    if let Ok(report) = report {
        for (name, outcome) in report.results {
            let snapshot = match outcome {
                SiteOutcome::Done(snap) => snap,
                SiteOutcome::TimedOut { after } => {
                    HealthSnapshot::offline(format!("sem resposta após {}s", after.as_secs()))
                }
                SiteOutcome::Failed(e) => HealthSnapshot::offline(e),
            };
            data.insert(name, snapshot);
        }
    }
    Json(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requete_d_operation_avec_parametres_aplatis() {
        let body: OperationRequest = serde_json::from_str(
            r#"{"profile_name": "posto1", "numero": 42, "modulo": "sync"}"#,
        )
        .unwrap();
        assert_eq!(body.profile_name.as_deref(), Some("posto1"));
        assert_eq!(body.params.numero, Some(42));
        assert_eq!(body.params.modulo.as_deref(), Some("sync"));
        assert!(body.profiles.is_none());
    }

    #[test]
    fn requete_multi_sites() {
        let body: OperationRequest =
            serde_json::from_str(r#"{"profiles": ["posto1", "loja2"], "codigos": [1, 2]}"#).unwrap();
        assert_eq!(body.profiles.as_deref(), Some(&["posto1".to_string(), "loja2".to_string()][..]));
        assert_eq!(body.params.codigos, Some(vec![1, 2]));
    }

    #[test]
    fn sauvegarde_de_profil_aplatie() {
        let body: SaveProfileRequest = serde_json::from_str(
            r#"{"name": "posto1", "host": "10.0.0.5", "tipo_posto": false}"#,
        )
        .unwrap();
        assert_eq!(body.name.as_deref(), Some("posto1"));
        assert_eq!(body.profile.host.as_deref(), Some("10.0.0.5"));
        assert!(!body.profile.tipo_posto);
        // défauts historiques préservés
        assert_eq!(body.profile.port, "5432");
    }
}
