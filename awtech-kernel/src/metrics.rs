/**
 * HEALTH METRICS - Collecte et interprétation de l'état d'un site
 *
 * RÔLE : Transforme les sorties brutes des commandes shell distantes
 * (uptime, free, df, loadavg...) en un instantané structuré pour le
 * tableau de bord de monitoring.
 *
 * FONCTIONNEMENT : le parsing est pur (map de sorties -> snapshot), la
 * collecte SSH vit dans le catalogue. Une sortie illisible dégrade le
 * champ concerné sans invalider le reste du snapshot.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::macros::format_description;
use time::OffsetDateTime;

/// Commandes shell exécutées sur chaque site pour construire le snapshot.
/// La clé est le nom du champ brut attendu par `HealthSnapshot::parse`.
pub const HEALTH_COMMANDS: &[(&str, &str)] = &[
    ("uptime", "uptime -p"),
    (
        "cpuinfo",
        "cat /proc/cpuinfo | grep \"model name\" | head -n1 | cut -d: -f2",
    ),
    ("memory", "free -m | grep Mem"),
    ("disk", "df -h / | tail -1"),
    ("load", "cat /proc/loadavg | cut -d\" \" -f1"),
    ("cores", "nproc"),
    (
        "postgres",
        "systemctl is-active postgresql 2>/dev/null || echo \"inactive\"",
    ),
    (
        "postgres_version",
        "psql --version 2>/dev/null | cut -d\" \" -f3 || echo \"N/A\"",
    ),
];

/// Instantané de santé d'un site, tel que servi au tableau de bord.
/// Reprend les noms de champs de l'API historique, réduits à ceux que
/// le tableau de bord exploite (le champ `latencia`, une constante,
/// n'a pas été repris ; l'heure de collecte est toujours en HH:MM:SS).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSnapshot {
    pub online: bool,
    pub processador: String,
    pub cpu_uso: u8,
    pub memoria_percent: u8,
    pub disco_percent: u8,
    pub uptime_short: String,
    pub postgres_status: bool,
    pub postgres_version: String,
    pub ultima_coleta: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            online: false,
            processador: "N/A".into(),
            cpu_uso: 0,
            memoria_percent: 0,
            disco_percent: 0,
            uptime_short: "N/A".into(),
            postgres_status: false,
            postgres_version: "unknown".into(),
            ultima_coleta: collection_time(),
            erro: None,
        }
    }
}

impl HealthSnapshot {
    /// Snapshot hors-ligne : le site n'a pas pu être interrogé du tout
    pub fn offline(erro: impl Into<String>) -> Self {
        Self {
            erro: Some(erro.into()),
            ..Self::default()
        }
    }

    /// Interprète les sorties brutes des HEALTH_COMMANDS. Un champ
    /// manquant ou illisible retombe sur sa valeur par défaut.
    pub fn parse(raw: &HashMap<String, String>) -> Self {
        let mut snap = Self {
            online: true,
            ..Self::default()
        };

        if let Some(cpuinfo) = raw.get("cpuinfo") {
            let model = cpuinfo.trim();
            if !model.is_empty() {
                snap.processador = model.to_string();
            }
        }

        // affichage compact : préfixe "up " retiré, 8 caractères max
        if let Some(uptime) = raw.get("uptime") {
            let up: String = uptime
                .trim()
                .trim_start_matches("up ")
                .chars()
                .take(8)
                .collect();
            if !up.is_empty() {
                snap.uptime_short = up;
            }
        }

        // "Mem:  7972  3241 ..." -> utilisé/total en pourcentage
        if let Some(memory) = raw.get("memory") {
            let fields: Vec<&str> = memory.split_whitespace().collect();
            if fields.len() >= 3 {
                let total: f64 = fields[1].parse().unwrap_or(0.0);
                let used: f64 = fields[2].parse().unwrap_or(0.0);
                if total > 0.0 {
                    snap.memoria_percent = clamp_percent(used / total * 100.0);
                }
            }
        }

        // "/dev/sda1  40G  30G  8G  80%  /" -> 5e colonne, sans le '%'
        if let Some(disk) = raw.get("disk") {
            let fields: Vec<&str> = disk.split_whitespace().collect();
            if let Some(pct) = fields.get(4) {
                if let Ok(v) = pct.trim_end_matches('%').parse::<f64>() {
                    snap.disco_percent = clamp_percent(v);
                }
            }
        }

        // charge 1min rapportée au nombre de coeurs du site
        let cores: f64 = raw
            .get("cores")
            .and_then(|c| c.trim().parse::<f64>().ok())
            .filter(|c| *c >= 1.0)
            .unwrap_or(1.0);
        if let Some(load) = raw.get("load") {
            if let Ok(l) = load.trim().parse::<f64>() {
                snap.cpu_uso = clamp_percent(l / cores * 100.0);
            }
        }

        if let Some(status) = raw.get("postgres") {
            snap.postgres_status = status.trim() == "active";
        }

        // seule la version majeure intéresse le tableau de bord
        if let Some(version) = raw.get("postgres_version") {
            let v = version.trim();
            if v.contains('.') {
                if let Some(major) = v.split('.').next() {
                    snap.postgres_version = major.to_string();
                }
            }
        }

        snap
    }
}

fn clamp_percent(v: f64) -> u8 {
    v.clamp(0.0, 100.0).round() as u8
}

/// Heure locale de la collecte, au format attendu par le front (HH:MM:SS)
fn collection_time() -> String {
    let fmt = format_description!("[hour]:[minute]:[second]");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&fmt).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_complet() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("uptime".into(), "up 3 days, 4 hours\n".into());
        m.insert("cpuinfo".into(), " Intel(R) Celeron(R) J4125\n".into());
        m.insert("memory".into(), "Mem:   7972   3986   1200 ...\n".into());
        m.insert("disk".into(), "/dev/sda1  40G  30G  8G  80% /\n".into());
        m.insert("load".into(), "1.00\n".into());
        m.insert("cores".into(), "4\n".into());
        m.insert("postgres".into(), "active\n".into());
        m.insert("postgres_version".into(), "16.4\n".into());
        m
    }

    #[test]
    fn parse_nominal() {
        let snap = HealthSnapshot::parse(&raw_complet());
        assert!(snap.online);
        assert_eq!(snap.processador, "Intel(R) Celeron(R) J4125");
        assert_eq!(snap.uptime_short, "3 days, ");
        assert_eq!(snap.memoria_percent, 50);
        assert_eq!(snap.disco_percent, 80);
        assert_eq!(snap.cpu_uso, 25);
        assert!(snap.postgres_status);
        assert_eq!(snap.postgres_version, "16");
        assert!(snap.erro.is_none());
    }

    #[test]
    fn memoire_totale_nulle_ne_divise_pas() {
        let mut raw = raw_complet();
        raw.insert("memory".into(), "Mem: 0 0 0".into());
        let snap = HealthSnapshot::parse(&raw);
        assert_eq!(snap.memoria_percent, 0);
    }

    #[test]
    fn charge_superieure_aux_coeurs_plafonne_a_100() {
        let mut raw = raw_complet();
        raw.insert("load".into(), "12.5".into());
        raw.insert("cores".into(), "2".into());
        let snap = HealthSnapshot::parse(&raw);
        assert_eq!(snap.cpu_uso, 100);
    }

    #[test]
    fn coeurs_illisibles_retombent_sur_un() {
        let mut raw = raw_complet();
        raw.insert("load".into(), "0.50".into());
        raw.insert("cores".into(), "zzz".into());
        let snap = HealthSnapshot::parse(&raw);
        assert_eq!(snap.cpu_uso, 50);
    }

    #[test]
    fn version_postgres_sans_point_reste_inconnue() {
        let mut raw = raw_complet();
        raw.insert("postgres_version".into(), "N/A".into());
        let snap = HealthSnapshot::parse(&raw);
        assert_eq!(snap.postgres_version, "unknown");
    }

    #[test]
    fn postgres_inactif() {
        let mut raw = raw_complet();
        raw.insert("postgres".into(), "inactive\n".into());
        let snap = HealthSnapshot::parse(&raw);
        assert!(!snap.postgres_status);
    }

    #[test]
    fn champs_absents_degradent_sans_paniquer() {
        let snap = HealthSnapshot::parse(&HashMap::new());
        assert!(snap.online);
        assert_eq!(snap.processador, "N/A");
        assert_eq!(snap.cpu_uso, 0);
        assert_eq!(snap.disco_percent, 0);
        assert!(!snap.postgres_status);
    }

    #[test]
    fn offline_porte_le_diagnostic() {
        let snap = HealthSnapshot::offline("timeout de conexão");
        assert!(!snap.online);
        assert_eq!(snap.erro.as_deref(), Some("timeout de conexão"));
        assert!(!snap.ultima_coleta.is_empty());
    }
}
