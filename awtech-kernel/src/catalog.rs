/**
 * OPERATION CATALOG - Catalogue fermé des opérations d'administration
 *
 * RÔLE : Chaque action exposée par l'API est une entrée nommée du
 * catalogue, avec validation de ses paramètres avant tout dispatch.
 * Aucun SQL ni commande shell n'entre par la requête : tout est défini
 * ici, les paramètres clients ne sont que des valeurs liées.
 *
 * ARCHITECTURE : trait Operation + registre (même patron que le store
 * de profils : enregistrement au démarrage, résolution par nom).
 */

use crate::db::{DbError, DbGateway, SqlBind};
use crate::metrics::{HealthSnapshot, HEALTH_COMMANDS};
use crate::models::{tail_chars, OperationResult, DIAG_MAX_CHARS};
use crate::profiles::{SharedProfileStore, SiteProfile};
use crate::ssh::{HostKeyPolicy, SshError, SshExecutor};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sqlx::Row;
use std::collections::HashMap;

/// Passerelles partagées par toutes les opérations. Le store est
/// embarqué pour l'enregistrement TOFU des empreintes de clé d'hôte.
#[derive(Clone)]
pub struct Gateways {
    pub db: DbGateway,
    pub ssh: SshExecutor,
    pub store: SharedProfileStore,
}

/// Paramètres optionnels d'une opération. Chaque opération valide les
/// siens, les autres champs sont ignorés.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpParams {
    pub numero: Option<i64>,
    pub pid: Option<i64>,
    pub codigo: Option<i64>,
    pub modulo: Option<String>,
    pub codigos: Option<Vec<i64>>,
}

#[async_trait]
pub trait Operation: Send + Sync {
    fn name(&self) -> &'static str;

    /// Validation des paramètres, avant résolution des sites
    fn validate(&self, _params: &OpParams) -> Result<(), String> {
        Ok(())
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult;
}

pub struct OperationCatalog {
    ops: HashMap<&'static str, Box<dyn Operation>>,
}

impl Default for OperationCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self { ops: HashMap::new() }
    }

    pub fn register(&mut self, op: Box<dyn Operation>) {
        println!("[catalog] registered operation: {}", op.name());
        self.ops.insert(op.name(), op);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Operation> {
        self.ops.get(name).map(|b| b.as_ref())
    }

    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.ops.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Catalogue complet de la console
pub fn default_catalog() -> OperationCatalog {
    let mut catalog = OperationCatalog::new();
    catalog.register(Box::new(ProcessarPrevenda));
    catalog.register(Box::new(FinalizarPidCodigo));
    catalog.register(Box::new(FinalizarPidModulo));
    catalog.register(Box::new(FinalizarTodosPids));
    catalog.register(Box::new(ConexoesAtivas));
    catalog.register(Box::new(ReiniciarConexoes));
    catalog.register(Box::new(LiberarProdutos));
    catalog.register(Box::new(Abastecimentos));
    catalog.register(Box::new(ExcluirAbastecimento));
    catalog.register(Box::new(LimparSessoes {
        name: "limpar-sincronia",
        where_clause: "modulo = 'sync'",
        message: "sessão(ões) de sincronia finalizada(s)!",
    }));
    catalog.register(Box::new(LimparSessoes {
        name: "limpar-precos",
        where_clause: "modulo = 'sync_precos'",
        message: "sessão(ões) de sincronia de preços finalizada(s)!",
    }));
    catalog.register(Box::new(LimparSessoes {
        name: "limpar-smartpos",
        where_clause: "modulo LIKE 'smart%' OR modulo LIKE 'monitor_smart%'",
        message: "sessão(ões) do SmartPOS finalizada(s)!",
    }));
    catalog.register(Box::new(InfoSistema));
    catalog.register(Box::new(ExecutarSincronia));
    catalog.register(Box::new(AtualizarSistema));
    catalog.register(Box::new(ReiniciarPostgres));
    catalog.register(Box::new(TestDb));
    catalog.register(Box::new(TestSsh));
    catalog
}

fn db_failure(site: &str, context: &str, e: DbError) -> OperationResult {
    OperationResult::failure(site, context, e.to_string())
}

/// Sous la politique TOFU, enregistre la première empreinte de clé
/// d'hôte observée sur le profil du site. Sans effet sous les autres
/// politiques ou si une empreinte est déjà connue.
pub async fn record_tofu_fingerprint(gw: &Gateways, site: &str, fingerprint: Option<&str>) {
    let Some(fp) = fingerprint else { return };
    if gw.ssh.policy() != HostKeyPolicy::Tofu {
        return;
    }
    if let Err(e) = gw.store.record_fingerprint(site, fp).await {
        eprintln!("[catalog] fingerprint persistence failed: {e}");
    }
}

/// Commande de synchronisation selon le type du site
pub fn sync_command(tipo_posto: bool) -> &'static str {
    if tipo_posto {
        "as_sync"
    } else {
        "as_sync --db-profile=LOJA"
    }
}

pub fn sync_label(tipo_posto: bool) -> &'static str {
    if tipo_posto { "POSTO" } else { "LOJA" }
}

/// Exécute une commande distante et interprète son code de sortie.
/// stderr (ou à défaut stdout) fournit le diagnostic en cas d'échec.
async fn run_remote(
    site: &str,
    profile: &SiteProfile,
    gw: &Gateways,
    command: &str,
    timeout_secs: u64,
    ok_message: String,
    fail_prefix: &str,
) -> OperationResult {
    match gw.ssh.run(profile, command, timeout_secs).await {
        Ok(out) if out.exit_code == 0 => OperationResult::success(site, ok_message)
            .with_payload(json!({ "output": tail_chars(&out.stdout, 500) })),
        Ok(out) => {
            let detail = if out.stderr.trim().is_empty() { &out.stdout } else { &out.stderr };
            OperationResult::failure(
                site,
                format!("{fail_prefix} (código: {})", out.exit_code),
                tail_chars(detail, DIAG_MAX_CHARS),
            )
        }
        Err(e) => OperationResult::failure(site, "Erro na execução", e.to_string()),
    }
}

// ========== OPÉRATIONS BASE DE DONNÉES ==========

struct ProcessarPrevenda;

#[async_trait]
impl Operation for ProcessarPrevenda {
    fn name(&self) -> &'static str {
        "processar-prevenda"
    }

    fn validate(&self, params: &OpParams) -> Result<(), String> {
        params
            .numero
            .map(|_| ())
            .ok_or_else(|| "Número da pré-venda é obrigatório".to_string())
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        let numero = params.numero.unwrap_or_default();
        match gw
            .db
            .fetch_all(
                profile,
                "SELECT processar_prevenda($1::int4)",
                vec![SqlBind::Int(numero)],
            )
            .await
        {
            Ok(_) => OperationResult::success(
                site,
                format!("Pré-venda {numero} processada com sucesso!"),
            ),
            Err(e) => db_failure(site, "Erro ao processar pré-venda", e),
        }
    }
}

struct FinalizarPidCodigo;

#[async_trait]
impl Operation for FinalizarPidCodigo {
    fn name(&self) -> &'static str {
        "finalizar-pid-codigo"
    }

    fn validate(&self, params: &OpParams) -> Result<(), String> {
        params
            .pid
            .map(|_| ())
            .ok_or_else(|| "PID não especificado".to_string())
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        let pid = params.pid.unwrap_or_default();
        match gw
            .db
            .fetch_all(
                profile,
                "SELECT pg_terminate_backend($1::int4)",
                vec![SqlBind::Int(pid)],
            )
            .await
        {
            Ok(_) => OperationResult::success(site, format!("PID {pid} finalizado com sucesso!")),
            Err(e) => db_failure(site, "Erro ao finalizar PID", e),
        }
    }
}

struct FinalizarPidModulo;

#[async_trait]
impl Operation for FinalizarPidModulo {
    fn name(&self) -> &'static str {
        "finalizar-pid-modulo"
    }

    fn validate(&self, params: &OpParams) -> Result<(), String> {
        match params.modulo.as_deref() {
            Some(m) if !m.trim().is_empty() => Ok(()),
            _ => Err("Módulo não especificado".to_string()),
        }
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        let modulo = params.modulo.clone().unwrap_or_default();
        let sql = "SELECT COALESCE(SUM(CASE WHEN pg_terminate_backend(pid) THEN 1 ELSE 0 END), 0) \
                   FROM usuario_pid WHERE modulo = $1";
        match gw
            .db
            .fetch_scalar(profile, sql, vec![SqlBind::Text(modulo.clone())])
            .await
        {
            Ok(qtd) => OperationResult::success(
                site,
                format!("{qtd} PID(s) do módulo {modulo} finalizado(s)!"),
            ),
            Err(e) => db_failure(site, "Erro ao finalizar PID", e),
        }
    }
}

struct FinalizarTodosPids;

#[async_trait]
impl Operation for FinalizarTodosPids {
    fn name(&self) -> &'static str {
        "finalizar-todos-pids"
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        let sql = "SELECT COALESCE(SUM(CASE WHEN pg_terminate_backend(pid) THEN 1 ELSE 0 END), 0) \
                   FROM pg_stat_activity \
                   WHERE datname = current_database() AND pid <> pg_backend_pid()";
        match gw.db.fetch_scalar(profile, sql, Vec::new()).await {
            Ok(qtd) => {
                OperationResult::success(site, format!("{qtd} conexões finalizadas com sucesso!"))
            }
            Err(e) => db_failure(site, "Erro ao finalizar conexões", e),
        }
    }
}

struct ConexoesAtivas;

#[async_trait]
impl Operation for ConexoesAtivas {
    fn name(&self) -> &'static str {
        "conexoes-ativas"
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        // les types non triviaux (inet, interval) sont rendus en texte
        // côté serveur pour garder un décodage de lignes uniforme
        let sql = "SELECT pid, usename::text AS usuario, application_name AS aplicacao, \
                          COALESCE(client_addr::text, '') AS ip, \
                          split_part((now() - backend_start)::text, '.', 1) AS tempo, \
                          left(COALESCE(query, ''), 60) AS query \
                   FROM pg_stat_activity \
                   WHERE pid <> pg_backend_pid() AND datname = current_database() \
                   ORDER BY pid";
        match gw.db.fetch_all(profile, sql, Vec::new()).await {
            Ok(rows) => {
                let conexoes: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|row| {
                        json!({
                            "pid": row.try_get::<i32, _>("pid").unwrap_or_default(),
                            "usuario": row.try_get::<Option<String>, _>("usuario").unwrap_or_default().unwrap_or_default(),
                            "aplicacao": row.try_get::<String, _>("aplicacao").unwrap_or_default(),
                            "ip": row.try_get::<String, _>("ip").unwrap_or_default(),
                            "tempo": row.try_get::<String, _>("tempo").unwrap_or_default(),
                            "query": row.try_get::<String, _>("query").unwrap_or_default(),
                        })
                    })
                    .collect();
                OperationResult::success(site, format!("{} conexão(ões) ativa(s)", conexoes.len()))
                    .with_payload(json!({ "conexoes": conexoes }))
            }
            Err(e) => db_failure(site, "Erro ao buscar conexões", e),
        }
    }
}

struct ReiniciarConexoes;

#[async_trait]
impl Operation for ReiniciarConexoes {
    fn name(&self) -> &'static str {
        "reiniciar-conexoes"
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        let sql = "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                   WHERE datname = current_database() AND pid <> pg_backend_pid()";
        match gw.db.fetch_all(profile, sql, Vec::new()).await {
            Ok(_) => OperationResult::success(site, "Conexões encerradas com sucesso!"),
            Err(e) => db_failure(site, "Erro ao reiniciar conexões", e),
        }
    }
}

struct LiberarProdutos;

#[async_trait]
impl Operation for LiberarProdutos {
    fn name(&self) -> &'static str {
        "liberar-produtos"
    }

    fn validate(&self, params: &OpParams) -> Result<(), String> {
        match &params.codigos {
            Some(c) if !c.is_empty() => Ok(()),
            _ => Err("Códigos não especificados".to_string()),
        }
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        let codigos = params.codigos.clone().unwrap_or_default();
        let sql = "INSERT INTO exc_br_inclusao_cadastro \
                       (empresa, produto, setor, tipo, usuario, data_cadastro, numero, status, livre) \
                   SELECT DISTINCT t.* \
                   FROM ( \
                       SELECT ex.empresa, p.grid, 2, 2, 'LZT', CURRENT_DATE, p.codigo::int8, 'N', TRUE \
                       FROM exc_br_config ex \
                       JOIN empresa e                  ON e.grid = ex.empresa \
                       JOIN deposito d                 ON d.empresa = e.grid \
                       JOIN deposito_grupo_produto dgp ON dgp.deposito = d.grid \
                       JOIN produto p                  ON p.grupo = dgp.grupo \
                       WHERE p.codigo::int8 = ANY($1) \
                   ) t \
                   LEFT JOIN exc_br_inclusao_cadastro ei \
                          ON ei.empresa = t.empresa AND ei.produto = t.grid \
                   WHERE ei.produto IS NULL";
        match gw
            .db
            .execute(profile, sql, vec![SqlBind::IntArray(codigos)])
            .await
        {
            // le nombre rapporté est celui des lignes réellement insérées,
            // les codes déjà libérés ne comptent pas
            Ok(qtd) => {
                OperationResult::success(site, format!("{qtd} produto(s) liberado(s) com sucesso!"))
            }
            Err(e) => db_failure(site, "Erro ao liberar produtos", e),
        }
    }
}

struct Abastecimentos;

#[async_trait]
impl Operation for Abastecimentos {
    fn name(&self) -> &'static str {
        "abastecimentos"
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        let sql = "SELECT codigo::int8 AS codigo, bico::int8 AS bico, \
                          quantidade::float8 AS quantidade, valor::float8 AS valor, \
                          COALESCE(to_char(hora, 'HH24:MI:SS'), '') AS hora, \
                          COALESCE(to_char(dia_fiscal, 'DD/MM/YYYY'), '') AS dia_fiscal \
                   FROM abastecimento \
                   ORDER BY codigo DESC \
                   LIMIT 500";
        match gw.db.fetch_all(profile, sql, Vec::new()).await {
            Ok(rows) => {
                let abastecimentos: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|row| {
                        json!({
                            "codigo": row.try_get::<i64, _>("codigo").unwrap_or_default(),
                            "bico": row.try_get::<i64, _>("bico").unwrap_or_default(),
                            "quantidade": row.try_get::<f64, _>("quantidade").unwrap_or_default(),
                            "valor": row.try_get::<f64, _>("valor").unwrap_or_default(),
                            "hora": row.try_get::<String, _>("hora").unwrap_or_default(),
                            "dia_fiscal": row.try_get::<String, _>("dia_fiscal").unwrap_or_default(),
                        })
                    })
                    .collect();
                OperationResult::success(
                    site,
                    format!("{} abastecimento(s)", abastecimentos.len()),
                )
                .with_payload(json!({ "abastecimentos": abastecimentos }))
            }
            Err(e) => db_failure(site, "Erro ao buscar abastecimentos", e),
        }
    }
}

struct ExcluirAbastecimento;

#[async_trait]
impl Operation for ExcluirAbastecimento {
    fn name(&self) -> &'static str {
        "excluir-abastecimento"
    }

    fn validate(&self, params: &OpParams) -> Result<(), String> {
        params
            .codigo
            .map(|_| ())
            .ok_or_else(|| "Código não especificado".to_string())
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        let codigo = params.codigo.unwrap_or_default();
        match gw
            .db
            .execute(
                profile,
                "DELETE FROM abastecimento WHERE codigo = $1",
                vec![SqlBind::Int(codigo)],
            )
            .await
        {
            Ok(_) => OperationResult::success(
                site,
                format!("Abastecimento {codigo} excluído com sucesso!"),
            ),
            Err(e) => db_failure(site, "Erro ao excluir abastecimento", e),
        }
    }
}

/// Nettoyage de sessions par famille de modules : trois entrées du
/// catalogue partagent cette implémentation, seul le filtre change.
struct LimparSessoes {
    name: &'static str,
    where_clause: &'static str,
    message: &'static str,
}

#[async_trait]
impl Operation for LimparSessoes {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        let sql = format!(
            "SELECT COALESCE(SUM(CASE WHEN pg_terminate_backend(pid) THEN 1 ELSE 0 END), 0) \
             FROM usuario_pid WHERE {}",
            self.where_clause
        );
        match gw.db.fetch_scalar(profile, &sql, Vec::new()).await {
            Ok(qtd) => OperationResult::success(site, format!("{qtd} {}", self.message)),
            Err(e) => db_failure(site, "Erro ao limpar sessões", e),
        }
    }
}

struct InfoSistema;

#[async_trait]
impl Operation for InfoSistema {
    fn name(&self) -> &'static str {
        "info-sistema"
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        let tamanho_bytes = match gw
            .db
            .fetch_scalar(profile, "SELECT pg_database_size(current_database())", Vec::new())
            .await
        {
            Ok(v) => v,
            Err(e) => return db_failure(site, "Erro ao buscar informações", e),
        };
        let tamanho_gib = (tamanho_bytes as f64 / (1024u64.pow(3) as f64) * 100.0).round() / 100.0;

        // dernière version vue par station, sur l'année en cours
        let sql = "SELECT DISTINCT ON (estacao) estacao::text AS estacao, versao::text AS versao, \
                          COALESCE(to_char(ts_atualizacao, 'DD/MM/YYYY HH24:MI'), '') AS ts_atualizacao \
                   FROM versao_estacao \
                   WHERE EXTRACT(YEAR FROM ts_atualizacao) = EXTRACT(YEAR FROM CURRENT_DATE) \
                   ORDER BY estacao, ts_atualizacao DESC";
        match gw.db.fetch_all(profile, sql, Vec::new()).await {
            Ok(rows) => {
                let estacoes: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|row| {
                        json!({
                            "estacao": row.try_get::<String, _>("estacao").unwrap_or_default(),
                            "versao": row.try_get::<String, _>("versao").unwrap_or_default(),
                            "ts_atualizacao": row.try_get::<String, _>("ts_atualizacao").unwrap_or_default(),
                        })
                    })
                    .collect();
                OperationResult::success(site, "Informações coletadas com sucesso!").with_payload(
                    json!({
                        "tamanho_banco": tamanho_gib,
                        "estacoes": estacoes,
                        "status": "online",
                    }),
                )
            }
            Err(e) => db_failure(site, "Erro ao buscar informações", e),
        }
    }
}

// ========== OPÉRATIONS SSH ==========

struct ExecutarSincronia;

#[async_trait]
impl Operation for ExecutarSincronia {
    fn name(&self) -> &'static str {
        "executar-sincronia"
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        run_remote(
            site,
            profile,
            gw,
            sync_command(profile.tipo_posto),
            300,
            format!(
                "Sincronia executada com sucesso! (Tipo: {})",
                sync_label(profile.tipo_posto)
            ),
            "Falha na sincronia",
        )
        .await
    }
}

struct AtualizarSistema;

#[async_trait]
impl Operation for AtualizarSistema {
    fn name(&self) -> &'static str {
        "atualizar-sistema"
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        run_remote(
            site,
            profile,
            gw,
            "as_update",
            300,
            "Sistema atualizado com sucesso!".to_string(),
            "Falha na atualização",
        )
        .await
    }
}

struct ReiniciarPostgres;

#[async_trait]
impl Operation for ReiniciarPostgres {
    fn name(&self) -> &'static str {
        "reiniciar-postgres"
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        run_remote(
            site,
            profile,
            gw,
            "sudo systemctl restart postgresql",
            60,
            "PostgreSQL reiniciado com sucesso!".to_string(),
            "Falha ao reiniciar PostgreSQL",
        )
        .await
    }
}

// ========== PROBES ==========

struct TestDb;

#[async_trait]
impl Operation for TestDb {
    fn name(&self) -> &'static str {
        "test-db"
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        match gw.db.probe(profile).await {
            Ok(()) => {
                OperationResult::success(site, format!("Conexão com {site} bem-sucedida!"))
            }
            Err(e) => OperationResult::failure(site, "Falha na conexão", e.to_string()),
        }
    }
}

struct TestSsh;

#[async_trait]
impl Operation for TestSsh {
    fn name(&self) -> &'static str {
        "test-ssh"
    }

    async fn run(
        &self,
        site: &str,
        profile: &SiteProfile,
        _params: &OpParams,
        gw: &Gateways,
    ) -> OperationResult {
        match gw.ssh.probe(profile).await {
            Ok(fingerprint) => {
                record_tofu_fingerprint(gw, site, fingerprint.as_deref()).await;
                OperationResult::success(site, format!("Conexão SSH com {site} bem-sucedida!"))
                    .with_payload(json!({ "fingerprint": fingerprint }))
            }
            Err(e) => OperationResult::failure(site, "Falha SSH", e.to_string()),
        }
    }
}

// ========== MONITORING ==========

/// Collecte les sorties des commandes de santé sur un site. Une erreur
/// d'accès (connexion, auth, clé d'hôte) rend le site hors-ligne ; un
/// timeout sur une commande isolée dégrade seulement le champ concerné.
pub async fn collect_health(profile: &SiteProfile, gw: &Gateways) -> HealthSnapshot {
    let mut raw: HashMap<String, String> = HashMap::new();
    let mut last_error = None;
    for (key, cmd) in HEALTH_COMMANDS {
        match gw.ssh.run(profile, cmd, 10).await {
            Ok(out) => {
                raw.insert((*key).to_string(), out.stdout.trim().to_string());
            }
            Err(
                e @ (SshError::NotConfigured
                | SshError::Connect(_)
                | SshError::Auth(_)
                | SshError::HostKey(_)),
            ) => return HealthSnapshot::offline(e.to_string()),
            Err(e) => {
                last_error = Some(e.to_string());
            }
        }
    }
    finish_snapshot(raw, last_error)
}

/// Un site dont aucune commande n'a répondu est hors-ligne, pas un
/// snapshot à zéro ; une collecte partielle reste en ligne.
fn finish_snapshot(raw: HashMap<String, String>, last_error: Option<String>) -> HealthSnapshot {
    if raw.is_empty() {
        return HealthSnapshot::offline(
            last_error.unwrap_or_else(|| "nenhum comando respondeu".to_string()),
        );
    }
    HealthSnapshot::parse(&raw)
}
