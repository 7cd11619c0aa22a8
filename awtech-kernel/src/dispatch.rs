/**
 * SITE DISPATCHER - Fan-out borné des opérations multi-sites
 *
 * RÔLE : Exécute une même opération sur N sites en parallèle, avec un
 * plafond de concurrence (sémaphore) et un timeout global par site.
 *
 * ARCHITECTURE : une tâche tokio par site, permis acquis avant l'appel,
 * fan-in par join. Un site lent, en timeout ou en panique n'affecte
 * jamais les résultats des autres.
 */

use crate::profiles::{ProfileStore, SiteProfile};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("perfis não encontrados: {}", .0.join(", "))]
    UnknownSites(Vec<String>),
}

/// Issue d'un site pendant un fan-out
#[derive(Debug)]
pub enum SiteOutcome<T> {
    Done(T),
    TimedOut { after: Duration },
    Failed(String),
}

/// Bilan d'un fan-out : une issue par site résolu, plus les noms ignorés
/// (mode non strict uniquement)
#[derive(Debug)]
pub struct DispatchReport<T> {
    pub results: HashMap<String, SiteOutcome<T>>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Plafond de concurrence global au processus : partagé par tous les
    /// appels à `dispatch`, pas réinitialisé par requête
    limiter: Arc<Semaphore>,
    site_timeout: Duration,
    strict: bool,
}

impl Dispatcher {
    pub fn new(max_in_flight: usize, site_timeout: Duration, strict: bool) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(max_in_flight.max(1))),
            site_timeout,
            strict,
        }
    }

    /// Résout les noms dans le store puis lance `run` pour chaque site.
    /// En mode strict, un seul nom inconnu fait échouer tout l'appel
    /// avant le moindre dispatch.
    pub async fn dispatch<T, F, Fut>(
        &self,
        names: &[String],
        store: &ProfileStore,
        run: F,
    ) -> Result<DispatchReport<T>, DispatchError>
    where
        T: Send + 'static,
        F: Fn(String, SiteProfile) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut resolved: Vec<(String, SiteProfile)> = Vec::with_capacity(names.len());
        let mut skipped: Vec<String> = Vec::new();
        for name in names {
            match store.get(name).await {
                Some(profile) => resolved.push((name.clone(), profile)),
                None => skipped.push(name.clone()),
            }
        }
        if self.strict && !skipped.is_empty() {
            return Err(DispatchError::UnknownSites(skipped));
        }
        if !skipped.is_empty() {
            println!("[dispatch] skipping unknown sites: {}", skipped.join(", "));
        }

        let sem = self.limiter.clone();
        let run = Arc::new(run);
        let site_timeout = self.site_timeout;

        let mut handles = Vec::with_capacity(resolved.len());
        for (name, profile) in resolved {
            let sem = sem.clone();
            let run = run.clone();
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                // le sémaphore n'est jamais fermé, un échec d'acquire est inoffensif
                let _permit = sem.acquire_owned().await.ok();
                match tokio::time::timeout(site_timeout, run(task_name, profile)).await {
                    Ok(value) => SiteOutcome::Done(value),
                    Err(_) => SiteOutcome::TimedOut { after: site_timeout },
                }
            });
            handles.push((name, handle));
        }

        let mut results = HashMap::with_capacity(handles.len());
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                // panique dans la tâche : isolée au site concerné
                Err(e) => SiteOutcome::Failed(e.to_string()),
            };
            results.insert(name, outcome);
        }

        Ok(DispatchReport { results, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    async fn store_avec(noms: &[&str]) -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));
        for n in noms {
            store.put(n, SiteProfile::default()).await.unwrap();
        }
        (dir, store)
    }

    fn noms(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn fan_out_en_parallele_pas_en_serie() {
        let (_dir, store) = store_avec(&["a", "b", "c", "d"]).await;
        let d = Dispatcher::new(8, Duration::from_secs(5), false);

        let debut = Instant::now();
        let report = d
            .dispatch(&noms(&["a", "b", "c", "d"]), &store, |name, _p| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                name
            })
            .await
            .unwrap();

        assert_eq!(report.results.len(), 4);
        // 4 x 100ms en série ferait 400ms : le parallélisme doit rester net
        assert!(debut.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn timeout_isole_au_site_lent() {
        let (_dir, store) = store_avec(&["lent", "rapide"]).await;
        let d = Dispatcher::new(8, Duration::from_millis(100), false);

        let report = d
            .dispatch(&noms(&["lent", "rapide"]), &store, |name, _p| async move {
                if name == "lent" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                name
            })
            .await
            .unwrap();

        assert!(matches!(report.results["lent"], SiteOutcome::TimedOut { .. }));
        assert!(matches!(report.results["rapide"], SiteOutcome::Done(_)));
    }

    #[tokio::test]
    async fn site_inconnu_ignore_en_mode_souple() {
        let (_dir, store) = store_avec(&["posto1"]).await;
        let d = Dispatcher::new(8, Duration::from_secs(5), false);

        let report = d
            .dispatch(&noms(&["posto1", "fantome"]), &store, |name, _p| async move { name })
            .await
            .unwrap();

        assert_eq!(report.skipped, vec!["fantome".to_string()]);
        assert!(report.results.contains_key("posto1"));
        assert!(!report.results.contains_key("fantome"));
    }

    #[tokio::test]
    async fn site_inconnu_bloque_en_mode_strict() {
        let (_dir, store) = store_avec(&["posto1"]).await;
        let d = Dispatcher::new(8, Duration::from_secs(5), true);

        let err = d
            .dispatch(&noms(&["posto1", "fantome"]), &store, |name, _p| async move { name })
            .await
            .unwrap_err();

        let DispatchError::UnknownSites(unknown) = err;
        assert_eq!(unknown, vec!["fantome".to_string()]);
    }

    #[tokio::test]
    async fn plafond_de_concurrence_respecte() {
        let (_dir, store) = store_avec(&["a", "b", "c", "d", "e", "f"]).await;
        let d = Dispatcher::new(2, Duration::from_secs(5), false);

        let en_vol = Arc::new(AtomicUsize::new(0));
        let pic = Arc::new(AtomicUsize::new(0));
        let en_vol2 = en_vol.clone();
        let pic2 = pic.clone();

        d.dispatch(
            &noms(&["a", "b", "c", "d", "e", "f"]),
            &store,
            move |name, _p| {
                let en_vol = en_vol2.clone();
                let pic = pic2.clone();
                async move {
                    let courant = en_vol.fetch_add(1, Ordering::SeqCst) + 1;
                    pic.fetch_max(courant, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    en_vol.fetch_sub(1, Ordering::SeqCst);
                    name
                }
            },
        )
        .await
        .unwrap();

        assert!(pic.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn plafond_partage_entre_appels_concurrents() {
        // deux fan-out simultanés sur le même dispatcher : le plafond
        // vaut pour le processus, pas pour chaque requête
        let (_dir, store) = store_avec(&["a", "b", "c", "d"]).await;
        let store = Arc::new(store);
        let d = Arc::new(Dispatcher::new(2, Duration::from_secs(5), false));

        let en_vol = Arc::new(AtomicUsize::new(0));
        let pic = Arc::new(AtomicUsize::new(0));

        let lancer = |sites: Vec<String>| {
            let d = d.clone();
            let store = store.clone();
            let en_vol = en_vol.clone();
            let pic = pic.clone();
            async move {
                d.dispatch(&sites, &store, move |name, _p| {
                    let en_vol = en_vol.clone();
                    let pic = pic.clone();
                    async move {
                        let courant = en_vol.fetch_add(1, Ordering::SeqCst) + 1;
                        pic.fetch_max(courant, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        en_vol.fetch_sub(1, Ordering::SeqCst);
                        name
                    }
                })
                .await
                .unwrap()
            }
        };

        let (r1, r2) = tokio::join!(lancer(noms(&["a", "b"])), lancer(noms(&["c", "d"])));
        assert_eq!(r1.results.len() + r2.results.len(), 4);
        assert!(pic.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panique_isolee_au_site_fautif() {
        let (_dir, store) = store_avec(&["ok", "ko"]).await;
        let d = Dispatcher::new(8, Duration::from_secs(5), false);

        let report = d
            .dispatch(&noms(&["ok", "ko"]), &store, |name, _p| async move {
                if name == "ko" {
                    panic!("boom");
                }
                name
            })
            .await
            .unwrap();

        assert!(matches!(report.results["ok"], SiteOutcome::Done(_)));
        assert!(matches!(report.results["ko"], SiteOutcome::Failed(_)));
    }
}
