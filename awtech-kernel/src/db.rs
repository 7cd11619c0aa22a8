/**
 * DATABASE SESSION GATEWAY - Accès PostgreSQL éphémère par site
 *
 * RÔLE : Ouvre une connexion neuve par appel (aucun pool), exécute exactement
 * une instruction paramétrée, puis ferme la connexion sur tous les chemins.
 *
 * FONCTIONNEMENT : paramètres issus exclusivement d'un SiteProfile résolu,
 * jamais d'une entrée libre. Connexion bornée par timeout explicite, aucune
 * relance (le dispatcher décide quoi faire d'un échec).
 * UTILITÉ : brique BD unique du catalogue d'opérations.
 */

use crate::models::{truncate_diag, DIAG_MAX_CHARS};
use crate::profiles::SiteProfile;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;

/// Erreurs du gateway : connexion impossible vs instruction en échec.
/// Les messages du driver sont tronqués pour l'affichage.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("banco de dados não configurado")]
    NotConfigured,
    #[error("{0}")]
    Connect(String),
    #[error("{0}")]
    Statement(String),
}

impl DbError {
    fn connect(e: impl ToString) -> Self {
        DbError::Connect(truncate_diag(&e.to_string(), DIAG_MAX_CHARS))
    }
    fn statement(e: impl ToString) -> Self {
        DbError::Statement(truncate_diag(&e.to_string(), DIAG_MAX_CHARS))
    }
}

/// Valeur liable à un paramètre `$n` d'une instruction du catalogue
#[derive(Debug, Clone)]
pub enum SqlBind {
    Int(i64),
    Text(String),
    IntArray(Vec<i64>),
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

fn apply_binds(mut q: PgQuery<'_>, binds: Vec<SqlBind>) -> PgQuery<'_> {
    for b in binds {
        q = match b {
            SqlBind::Int(v) => q.bind(v),
            SqlBind::Text(v) => q.bind(v),
            SqlBind::IntArray(v) => q.bind(v),
        };
    }
    q
}

#[derive(Debug, Clone)]
pub struct DbGateway {
    connect_timeout: Duration,
}

impl DbGateway {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn options(profile: &SiteProfile) -> Result<PgConnectOptions, DbError> {
        let (Some(host), Some(db), Some(user)) = (&profile.host, &profile.db, &profile.user)
        else {
            return Err(DbError::NotConfigured);
        };
        let port = profile.port.parse::<u16>().unwrap_or(5432);
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(db)
            .username(user);
        if let Some(password) = &profile.password {
            opts = opts.password(password);
        }
        Ok(opts)
    }

    /// Connexion neuve, bornée par le timeout du gateway
    async fn connect(&self, profile: &SiteProfile) -> Result<PgConnection, DbError> {
        let opts = Self::options(profile)?;
        match tokio::time::timeout(self.connect_timeout, opts.connect()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(DbError::connect(e)),
            Err(_) => Err(DbError::Connect(format!(
                "timeout de conexão ({}s)",
                self.connect_timeout.as_secs()
            ))),
        }
    }

    /// Teste la connexion (ouvre puis ferme), sans exécuter d'instruction
    pub async fn probe(&self, profile: &SiteProfile) -> Result<(), DbError> {
        let conn = self.connect(profile).await?;
        let _ = conn.close().await;
        Ok(())
    }

    /// Exécute une instruction mutante, retourne le nombre de lignes touchées
    pub async fn execute(
        &self,
        profile: &SiteProfile,
        sql: &str,
        binds: Vec<SqlBind>,
    ) -> Result<u64, DbError> {
        let mut conn = self.connect(profile).await?;
        let res = apply_binds(sqlx::query(sql), binds).execute(&mut conn).await;
        let _ = conn.close().await;
        Ok(res.map_err(DbError::statement)?.rows_affected())
    }

    /// Exécute une instruction retournant un seul entier (SUM/COUNT coalescés)
    pub async fn fetch_scalar(
        &self,
        profile: &SiteProfile,
        sql: &str,
        binds: Vec<SqlBind>,
    ) -> Result<i64, DbError> {
        let mut conn = self.connect(profile).await?;
        let res = apply_binds(sqlx::query(sql), binds).fetch_one(&mut conn).await;
        let _ = conn.close().await;
        let row = res.map_err(DbError::statement)?;
        use sqlx::Row;
        let value: Option<i64> = row.try_get(0).map_err(DbError::statement)?;
        Ok(value.unwrap_or(0))
    }

    /// Exécute une requête et rapatrie toutes les lignes. Les requêtes du
    /// catalogue sont bornées (LIMIT ou cardinalité naturelle).
    pub async fn fetch_all(
        &self,
        profile: &SiteProfile,
        sql: &str,
        binds: Vec<SqlBind>,
    ) -> Result<Vec<PgRow>, DbError> {
        let mut conn = self.connect(profile).await?;
        let res = apply_binds(sqlx::query(sql), binds).fetch_all(&mut conn).await;
        let _ = conn.close().await;
        res.map_err(DbError::statement)
    }
}
