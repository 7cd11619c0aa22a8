/**
 * PROFILE STORE - Registre des profils de connexion des sites (postos/lojas)
 *
 * RÔLE : Persistance JSON des identifiants PostgreSQL + SSH de chaque site.
 * Chaque save remplace intégralement le profil (pas de merge), suppression par nom.
 *
 * ARCHITECTURE : HashMap sous RwLock + écriture atomique (fichier temporaire
 * puis rename) pour qu'un dispatch concurrent ne lise jamais un état partiel.
 * UTILITÉ : Source unique des paramètres de connexion, jamais d'endpoint libre.
 */

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Profil de connexion d'un site. Tous les identifiants sont optionnels
/// indépendamment : une opération SSH échoue proprement si les champs SSH
/// manquent, idem côté base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteProfile {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_pass: Option<String>,
    /// true = posto, false = loja (la commande de sync diffère)
    #[serde(default = "default_true")]
    pub tipo_posto: bool,
    /// Empreinte SHA-256 de la clé d'hôte SSH, enregistrée sous la
    /// politique TOFU puis exigée en mode strict
    #[serde(default)]
    pub ssh_fingerprint: Option<String>,
}

fn default_port() -> String { "5432".into() }
fn default_ssh_user() -> String { "root".into() }
fn default_true() -> bool { true }

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            db: None,
            user: None,
            password: None,
            ssh_user: default_ssh_user(),
            ssh_pass: None,
            tipo_posto: true,
            ssh_fingerprint: None,
        }
    }
}

pub type ProfilesMap = HashMap<String, SiteProfile>;

pub struct ProfileStore {
    profiles: RwLock<ProfilesMap>,
    data_file: PathBuf,
}

pub type SharedProfileStore = Arc<ProfileStore>;

impl ProfileStore {
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            data_file: data_file.into(),
        }
    }

    /// Charge les profils depuis le fichier JSON de persistance
    pub async fn load(&self) -> Result<()> {
        if !self.data_file.exists() {
            println!("[profiles] no existing profiles file, starting fresh");
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.data_file).await?;
        let profiles: ProfilesMap = serde_json::from_str(&content)?;

        let mut map = self.profiles.write().await;
        let count = profiles.len();
        *map = profiles;

        println!("[profiles] loaded {} profiles from {:?}", count, self.data_file);
        Ok(())
    }

    /// Sauvegarde atomique : écrit dans un fichier temporaire voisin puis
    /// rename par-dessus. Les lecteurs ne voient jamais un JSON tronqué.
    /// Toujours appelé sous le verrou d'écriture : les renames se font
    /// dans l'ordre des mutations et le fichier temporaire n'est jamais
    /// partagé entre deux écrivains.
    async fn persist(&self, map: &ProfilesMap) -> Result<()> {
        let content = serde_json::to_string_pretty(map)?;
        let tmp = self.data_file.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.data_file).await?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<SiteProfile> {
        self.profiles.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> ProfilesMap {
        self.profiles.read().await.clone()
    }

    /// Remplace intégralement le profil (pas de merge) et persiste
    pub async fn put(&self, name: &str, profile: SiteProfile) -> Result<()> {
        let mut map = self.profiles.write().await;
        map.insert(name.to_string(), profile);
        self.persist(&map).await?;
        println!("[profiles] saved profile {}", name);
        Ok(())
    }

    /// Supprime un profil par nom. false si inconnu.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let mut map = self.profiles.write().await;
        if map.remove(name).is_none() {
            return Ok(false);
        }
        self.persist(&map).await?;
        println!("[profiles] deleted profile {}", name);
        Ok(true)
    }

    /// Enregistre l'empreinte de clé d'hôte observée (politique TOFU)
    pub async fn record_fingerprint(&self, name: &str, fingerprint: &str) -> Result<()> {
        let mut map = self.profiles.write().await;
        match map.get_mut(name) {
            Some(p) if p.ssh_fingerprint.is_none() => {
                p.ssh_fingerprint = Some(fingerprint.to_string());
            }
            _ => return Ok(()),
        }
        self.persist(&map).await?;
        println!("[profiles] recorded host key fingerprint for {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_complet() -> SiteProfile {
        SiteProfile {
            host: Some("10.0.0.5".into()),
            port: "5432".into(),
            db: Some("posto1".into()),
            user: Some("x".into()),
            password: Some("y".into()),
            ssh_user: "root".into(),
            ssh_pass: Some("z".into()),
            tipo_posto: true,
            ssh_fingerprint: None,
        }
    }

    #[tokio::test]
    async fn round_trip_save_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));

        store.put("posto1", profile_complet()).await.unwrap();
        let relu = store.get("posto1").await.unwrap();
        assert_eq!(relu, profile_complet());

        // rechargement depuis le disque : égalité champ à champ
        let store2 = ProfileStore::new(dir.path().join("profiles.json"));
        store2.load().await.unwrap();
        assert_eq!(store2.get("posto1").await.unwrap(), profile_complet());
    }

    #[tokio::test]
    async fn save_remplace_sans_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));

        store.put("loja2", profile_complet()).await.unwrap();
        // nouveau save sans champs SSH : les anciens ne doivent pas survivre
        let mut nu = SiteProfile::default();
        nu.host = Some("10.0.0.9".into());
        store.put("loja2", nu.clone()).await.unwrap();

        let relu = store.get("loja2").await.unwrap();
        assert_eq!(relu.ssh_pass, None);
        assert_eq!(relu.host, Some("10.0.0.9".into()));
    }

    #[tokio::test]
    async fn puts_concurrents_persistes_sans_perte() {
        // deux écrivains simultanés : aucun put ne doit échouer et les
        // deux profils doivent survivre au rechargement depuis le disque
        for _ in 0..50 {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(ProfileStore::new(dir.path().join("profiles.json")));

            let t1 = tokio::spawn({
                let s = store.clone();
                async move { s.put("posto1", profile_complet()).await }
            });
            let t2 = tokio::spawn({
                let s = store.clone();
                async move { s.put("loja2", SiteProfile::default()).await }
            });
            t1.await.unwrap().unwrap();
            t2.await.unwrap().unwrap();

            let relu = ProfileStore::new(dir.path().join("profiles.json"));
            relu.load().await.unwrap();
            assert!(relu.get("posto1").await.is_some());
            assert!(relu.get("loja2").await.is_some());
        }
    }

    #[tokio::test]
    async fn delete_par_nom() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));

        store.put("posto1", profile_complet()).await.unwrap();
        assert!(store.delete("posto1").await.unwrap());
        assert!(!store.delete("posto1").await.unwrap());
        assert!(store.get("posto1").await.is_none());
    }

    #[tokio::test]
    async fn fingerprint_tofu_enregistre_une_seule_fois() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));

        store.put("posto1", profile_complet()).await.unwrap();
        store.record_fingerprint("posto1", "aa11").await.unwrap();
        store.record_fingerprint("posto1", "bb22").await.unwrap();
        assert_eq!(store.get("posto1").await.unwrap().ssh_fingerprint, Some("aa11".into()));
    }

    #[test]
    fn defauts_de_deserialisation() {
        // un profil minimal hérite des défauts historiques (port 5432, root, posto)
        let p: SiteProfile = serde_json::from_str(r#"{"host": "1.2.3.4"}"#).unwrap();
        assert_eq!(p.port, "5432");
        assert_eq!(p.ssh_user, "root");
        assert!(p.tipo_posto);
    }
}
