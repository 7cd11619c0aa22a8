/**
 * REMOTE COMMAND EXECUTOR - Exécution de commandes via SSH sur les sites
 *
 * RÔLE : Session SSH neuve par appel (mot de passe), une commande avec pty
 * (les scripts as_sync/as_update refusent de tourner sans), timeout dur,
 * capture stdout/stderr + code de sortie, fermeture sur tous les chemins.
 *
 * SÉCURITÉ : vérification de la clé d'hôte selon la politique configurée.
 * strict (défaut) exige l'empreinte enregistrée sur le profil ; tofu
 * enregistre la première empreinte observée ; accept est l'opt-out explicite
 * de l'ancien comportement (acceptation aveugle).
 */

use crate::models::{truncate_diag, DIAG_MAX_CHARS};
use crate::profiles::SiteProfile;
use serde::{Deserialize, Serialize};
use ssh2::Session;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Politique de vérification des clés d'hôte SSH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostKeyPolicy {
    #[default]
    Strict,
    Tofu,
    Accept,
}

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("SSH não configurado")]
    NotConfigured,
    #[error("{0}")]
    Connect(String),
    #[error("autenticação SSH recusada: {0}")]
    Auth(String),
    #[error("chave de host rejeitada: {0}")]
    HostKey(String),
    #[error("timeout após {0}s")]
    Timeout(u64),
    #[error("{0}")]
    Session(String),
}

impl SshError {
    fn connect(e: impl ToString) -> Self {
        SshError::Connect(truncate_diag(&e.to_string(), DIAG_MAX_CHARS))
    }
    fn session(e: impl ToString) -> Self {
        SshError::Session(truncate_diag(&e.to_string(), DIAG_MAX_CHARS))
    }
}

#[derive(Debug, Clone)]
pub struct SshOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Empreinte SHA-256 (hex) de la clé d'hôte observée pendant la session
    pub fingerprint: Option<String>,
}

/// Cible SSH extraite d'un profil résolu
#[derive(Debug, Clone)]
struct SshTarget {
    host: String,
    user: String,
    pass: String,
    fingerprint: Option<String>,
}

impl SshTarget {
    fn from_profile(profile: &SiteProfile) -> Result<Self, SshError> {
        let (Some(host), Some(pass)) = (&profile.host, &profile.ssh_pass) else {
            return Err(SshError::NotConfigured);
        };
        Ok(Self {
            host: host.clone(),
            user: profile.ssh_user.clone(),
            pass: pass.clone(),
            fingerprint: profile.ssh_fingerprint.clone(),
        })
    }
}

/// Vérifie la clé d'hôte observée contre la politique et l'empreinte
/// enregistrée sur le profil.
fn verify_host_key(
    policy: HostKeyPolicy,
    expected: Option<&str>,
    observed: Option<&str>,
) -> Result<(), SshError> {
    match policy {
        HostKeyPolicy::Accept => Ok(()),
        HostKeyPolicy::Tofu => match (expected, observed) {
            (Some(e), Some(o)) if e != o => Err(SshError::HostKey(format!(
                "impressão digital divergente (esperada {e}, observada {o})"
            ))),
            _ => Ok(()),
        },
        HostKeyPolicy::Strict => match (expected, observed) {
            (Some(e), Some(o)) if e == o => Ok(()),
            (Some(e), Some(o)) => Err(SshError::HostKey(format!(
                "impressão digital divergente (esperada {e}, observada {o})"
            ))),
            (Some(_), None) => Err(SshError::HostKey("host não forneceu chave".into())),
            (None, _) => Err(SshError::HostKey(
                "nenhuma impressão digital registrada para este host (política strict)".into(),
            )),
        },
    }
}

fn hex_fingerprint(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone)]
pub struct SshExecutor {
    policy: HostKeyPolicy,
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(policy: HostKeyPolicy, connect_timeout: Duration) -> Self {
        Self { policy, connect_timeout }
    }

    pub fn policy(&self) -> HostKeyPolicy {
        self.policy
    }

    /// Exécute une commande avec pty et timeout dur. La session est fermée
    /// sur tous les chemins (drop de la Session coupe le TCP).
    pub async fn run(
        &self,
        profile: &SiteProfile,
        command: &str,
        timeout_secs: u64,
    ) -> Result<SshOutput, SshError> {
        let target = SshTarget::from_profile(profile)?;
        let policy = self.policy;
        let connect_timeout = self.connect_timeout;
        let command = command.to_string();

        let task = tokio::task::spawn_blocking(move || {
            run_blocking(&target, policy, connect_timeout, &command, timeout_secs)
        });
        // garde-fou : le thread bloquant est lui-même borné par
        // session.set_timeout, la marge couvre l'établissement
        let guard = Duration::from_secs(timeout_secs) + connect_timeout + Duration::from_secs(5);
        match tokio::time::timeout(guard, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SshError::session(e)),
            Err(_) => Err(SshError::Timeout(timeout_secs)),
        }
    }

    /// Ouvre puis ferme une session (test de connexion). Retourne
    /// l'empreinte observée pour l'enregistrement TOFU.
    pub async fn probe(&self, profile: &SiteProfile) -> Result<Option<String>, SshError> {
        let target = SshTarget::from_profile(profile)?;
        let policy = self.policy;
        let connect_timeout = self.connect_timeout;

        let task = tokio::task::spawn_blocking(move || {
            open_session(&target, policy, connect_timeout).map(|(_, fp)| fp)
        });
        let guard = connect_timeout + Duration::from_secs(5);
        match tokio::time::timeout(guard, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SshError::session(e)),
            Err(_) => Err(SshError::Timeout(connect_timeout.as_secs())),
        }
    }
}

fn open_session(
    target: &SshTarget,
    policy: HostKeyPolicy,
    connect_timeout: Duration,
) -> Result<(Session, Option<String>), SshError> {
    let addr = (target.host.as_str(), 22u16)
        .to_socket_addrs()
        .map_err(SshError::connect)?
        .next()
        .ok_or_else(|| SshError::Connect(format!("host não resolvido: {}", target.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, connect_timeout).map_err(SshError::connect)?;
    tcp.set_read_timeout(Some(connect_timeout)).ok();
    tcp.set_write_timeout(Some(connect_timeout)).ok();

    let mut session = Session::new().map_err(SshError::session)?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(SshError::connect)?;

    let observed = session
        .host_key_hash(ssh2::HashType::Sha256)
        .map(hex_fingerprint);
    verify_host_key(policy, target.fingerprint.as_deref(), observed.as_deref())?;

    session
        .userauth_password(&target.user, &target.pass)
        .map_err(|e| SshError::Auth(truncate_diag(&e.to_string(), DIAG_MAX_CHARS)))?;
    if !session.authenticated() {
        return Err(SshError::Auth("credenciais rejeitadas".into()));
    }

    Ok((session, observed))
}

fn run_blocking(
    target: &SshTarget,
    policy: HostKeyPolicy,
    connect_timeout: Duration,
    command: &str,
    timeout_secs: u64,
) -> Result<SshOutput, SshError> {
    let (session, fingerprint) = open_session(target, policy, connect_timeout)?;

    let started = Instant::now();
    let deadline = Duration::from_secs(timeout_secs);
    // les opérations bloquantes de la session échouent passé ce délai
    session.set_timeout(deadline.as_millis().min(u32::MAX as u128) as u32);

    let timed_out = |e: ssh2::Error| {
        if started.elapsed() >= deadline {
            SshError::Timeout(timeout_secs)
        } else {
            SshError::session(e)
        }
    };
    let timed_out_io = |e: std::io::Error| {
        if started.elapsed() >= deadline {
            SshError::Timeout(timeout_secs)
        } else {
            SshError::session(e)
        }
    };

    let mut channel = session.channel_session().map_err(timed_out)?;
    let _ = channel.request_pty("xterm", None, None);
    channel.exec(command).map_err(timed_out)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout).map_err(timed_out_io)?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(timed_out_io)?;

    channel.wait_close().ok();
    let exit_code = channel.exit_status().unwrap_or(-1);

    Ok(SshOutput {
        stdout,
        stderr,
        exit_code,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn politique_par_defaut_strict() {
        assert_eq!(HostKeyPolicy::default(), HostKeyPolicy::Strict);
        let p: HostKeyPolicy = serde_yaml::from_str("tofu").unwrap();
        assert_eq!(p, HostKeyPolicy::Tofu);
    }

    #[test]
    fn strict_exige_empreinte_enregistree() {
        assert!(verify_host_key(HostKeyPolicy::Strict, None, Some("aa")).is_err());
        assert!(verify_host_key(HostKeyPolicy::Strict, Some("aa"), Some("bb")).is_err());
        assert!(verify_host_key(HostKeyPolicy::Strict, Some("aa"), Some("aa")).is_ok());
    }

    #[test]
    fn tofu_accepte_la_premiere_vue_mais_pas_un_changement() {
        assert!(verify_host_key(HostKeyPolicy::Tofu, None, Some("aa")).is_ok());
        assert!(verify_host_key(HostKeyPolicy::Tofu, Some("aa"), Some("aa")).is_ok());
        assert!(verify_host_key(HostKeyPolicy::Tofu, Some("aa"), Some("bb")).is_err());
    }

    #[test]
    fn accept_ne_verifie_rien() {
        assert!(verify_host_key(HostKeyPolicy::Accept, Some("aa"), Some("bb")).is_ok());
        assert!(verify_host_key(HostKeyPolicy::Accept, None, None).is_ok());
    }

    #[test]
    fn profil_sans_ssh_refuse_proprement() {
        let p = SiteProfile {
            host: Some("10.0.0.5".into()),
            ..Default::default()
        };
        assert!(matches!(SshTarget::from_profile(&p), Err(SshError::NotConfigured)));
    }

    #[test]
    fn empreinte_en_hexadecimal() {
        assert_eq!(hex_fingerprint(&[0x00, 0xab, 0xff]), "00abff");
    }

    #[tokio::test]
    async fn hote_injoignable_est_un_connect_error() {
        let p = SiteProfile {
            host: Some("192.0.2.1".into()),
            ssh_pass: Some("x".into()),
            ..Default::default()
        };
        let ex = SshExecutor::new(HostKeyPolicy::Accept, Duration::from_millis(200));
        match ex.probe(&p).await {
            Err(SshError::Connect(_)) | Err(SshError::Timeout(_)) => {}
            other => panic!("attendu Connect/Timeout, obtenu {:?}", other),
        }
    }
}
