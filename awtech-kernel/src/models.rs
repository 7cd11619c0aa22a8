use serde::{Deserialize, Serialize};

/// Longueur max des diagnostics remontés au client
pub const DIAG_MAX_CHARS: usize = 200;

/// Résultat d'une opération d'administration sur un site.
/// Succès et échec sont exclusifs : message+payload OU error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub site: String,
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn success(site: &str, message: impl Into<String>) -> Self {
        Self {
            site: site.to_string(),
            ok: true,
            message: message.into(),
            payload: None,
            error: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn failure(site: &str, message: impl Into<String>, detail: impl AsRef<str>) -> Self {
        Self {
            site: site.to_string(),
            ok: false,
            message: message.into(),
            payload: None,
            error: Some(truncate_diag(detail.as_ref(), DIAG_MAX_CHARS)),
        }
    }
}

/// Tronque un diagnostic à `max` caractères, jamais au milieu d'un
/// caractère multi-octets (l'encodage doit rester valide).
pub fn truncate_diag(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Derniers `max` caractères d'une sortie (tail), pour les logs de commandes
/// distantes volumineux.
pub fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    s.chars().skip(count - max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn troncature_respecte_les_frontieres_utf8() {
        // "ção" en plein milieu : aucun octet ne doit être coupé
        let s = "Falha na conexão às 10h: çãçãçã".repeat(20);
        let t = truncate_diag(&s, 50);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), 53);
        assert!(String::from_utf8(t.into_bytes()).is_ok());
    }

    #[test]
    fn troncature_sans_effet_si_court() {
        assert_eq!(truncate_diag("ok", 200), "ok");
    }

    #[test]
    fn tail_garde_la_fin() {
        let s = "aaaaabbbbb";
        assert_eq!(tail_chars(s, 5), "bbbbb");
        assert_eq!(tail_chars("àéíóú", 2), "óú");
        assert_eq!(tail_chars("court", 500), "court");
    }

    #[test]
    fn resultat_succes_et_echec_exclusifs() {
        let ok = OperationResult::success("posto1", "feito").with_payload(serde_json::json!({"n": 1}));
        assert!(ok.ok && ok.error.is_none() && ok.payload.is_some());

        let ko = OperationResult::failure("posto1", "falhou", "detalhe");
        assert!(!ko.ok && ko.error.is_some() && ko.payload.is_none());
    }
}
