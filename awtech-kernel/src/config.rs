use crate::ssh::HostKeyPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsoleConfig {
    /// Port HTTP du kernel
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fichier JSON de persistance des profils de sites
    #[serde(default = "default_profiles_file")]
    pub profiles_file: String,
    /// Nombre max de sites traités en parallèle par le dispatcher
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Timeout global par site pendant un fan-out (secondes)
    #[serde(default = "default_site_timeout")]
    pub site_timeout_seconds: u64,
    /// Timeout des probes de connexion BD/SSH (secondes)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,
    /// Timeout d'établissement des sessions SSH (secondes)
    #[serde(default = "default_ssh_connect_timeout")]
    pub ssh_connect_timeout_seconds: u64,
    /// Politique de vérification des clés d'hôte SSH (strict par défaut)
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    /// true = un nom de site inconnu fait échouer toute la requête
    /// false = le site inconnu est ignoré silencieusement (comportement historique)
    #[serde(default)]
    pub strict_sites: bool,
}

fn default_port() -> u16 { 5000 }
fn default_profiles_file() -> String { "profiles.json".into() }
fn default_max_in_flight() -> usize { 8 }
fn default_site_timeout() -> u64 { 330 }
fn default_probe_timeout() -> u64 { 5 }
fn default_ssh_connect_timeout() -> u64 { 10 }

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            profiles_file: default_profiles_file(),
            max_in_flight: default_max_in_flight(),
            site_timeout_seconds: default_site_timeout(),
            probe_timeout_seconds: default_probe_timeout(),
            ssh_connect_timeout_seconds: default_ssh_connect_timeout(),
            host_key_policy: HostKeyPolicy::default(),
            strict_sites: false,
        }
    }
}

pub async fn load_config() -> ConsoleConfig {
    let path = std::env::var("AWTECH_KERNEL_CONFIG").unwrap_or_else(|_| "awtech.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() { return ConsoleConfig::default(); }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            eprintln!("[kernel] config invalide: {e}");
            ConsoleConfig::default()
        })
    } else {
        eprintln!("[kernel] pas de awtech.yaml, usage config par défaut");
        ConsoleConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_par_defaut() {
        let cfg = ConsoleConfig::default();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.max_in_flight, 8);
        assert!(!cfg.strict_sites);
        assert_eq!(cfg.host_key_policy, HostKeyPolicy::Strict);
    }

    #[test]
    fn config_partielle_en_yaml() {
        let cfg: ConsoleConfig = serde_yaml::from_str("port: 8080\nstrict_sites: true\n").unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.strict_sites);
        // les champs absents retombent sur les défauts
        assert_eq!(cfg.site_timeout_seconds, 330);
        assert_eq!(cfg.host_key_policy, HostKeyPolicy::Strict);
    }
}
