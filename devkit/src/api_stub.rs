/*!
API locale et découverte simulées

`ScriptedApi` répond par chemin à partir d'une file de réponses (la dernière
se répète). `ScriptedDiscovery` simule le processus client: pid présent ou
non, échecs de validation, et distribue des handles `ScriptedApi`.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use riftdeck_agent::discovery::ClientDiscovery;
use riftdeck_agent::error::{DiscoveryError, PollError};
use riftdeck_agent::poller::LocalApi;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Answer = Result<Value, u16>;

#[derive(Default)]
struct Script {
    answers: HashMap<String, VecDeque<Answer>>,
    calls: HashMap<String, usize>,
}

/// API dont les réponses sont scriptées par chemin
#[derive(Clone, Default)]
pub struct ScriptedApi {
    script: Arc<Mutex<Script>>,
    pid: Option<u32>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Même script, autre pid (un handle par session client)
    pub fn with_pid(&self, pid: u32) -> Self {
        Self { script: self.script.clone(), pid: Some(pid) }
    }

    /// Réponse fixe
    pub fn set(&self, path: &str, value: Value) {
        self.script.lock().answers.insert(path.to_string(), VecDeque::from([Ok(value)]));
    }

    /// Séquence de réponses; la dernière se répète
    pub fn script(&self, path: &str, values: Vec<Value>) {
        let queue = values.into_iter().map(Ok).collect();
        self.script.lock().answers.insert(path.to_string(), queue);
    }

    /// Toutes les requêtes sur ce chemin échouent avec ce statut HTTP
    pub fn fail(&self, path: &str, status: u16) {
        self.script.lock().answers.insert(path.to_string(), VecDeque::from([Err(status)]));
    }

    pub fn calls(&self, path: &str) -> usize {
        self.script.lock().calls.get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LocalApi for ScriptedApi {
    async fn get_json(&self, path: &str) -> Result<Value, PollError> {
        let mut script = self.script.lock();
        *script.calls.entry(path.to_string()).or_insert(0) += 1;

        let answer = match script.answers.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match answer {
            Some(Ok(value)) => Ok(value),
            Some(Err(status)) => Err(PollError::Status { path: path.to_string(), status }),
            // chemin inconnu: comme le client, 404
            None => Err(PollError::Status { path: path.to_string(), status: 404 }),
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Découverte simulée autour d'un `ScriptedApi`
pub struct ScriptedDiscovery {
    api: ScriptedApi,
    pid: Mutex<Option<u32>>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl ScriptedDiscovery {
    pub fn new(api: ScriptedApi) -> Self {
        Self {
            api,
            pid: Mutex::new(None),
            failures_left: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Démarre (Some) ou arrête (None) le processus simulé
    pub fn set_running(&self, pid: Option<u32>) {
        log::info!("[MOCK] client process: {:?}", pid);
        *self.pid.lock() = pid;
    }

    /// Les `count` prochaines découvertes échouent à la validation
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientDiscovery for ScriptedDiscovery {
    async fn client_pid(&self) -> Option<u32> {
        *self.pid.lock()
    }

    async fn discover(&self, generation: u64) -> Result<Arc<dyn LocalApi>, DiscoveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let pid = self.client_pid().await.ok_or(DiscoveryError::NotRunning)?;

        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(DiscoveryError::ValidationFailed("HTTP 503".to_string()));
        }

        log::info!("[MOCK] discovered client pid {} (generation {})", pid, generation);
        Ok(Arc::new(self.api.with_pid(pid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_answers() {
        let api = ScriptedApi::new();
        api.script("/phase", vec![json!("Lobby"), json!("ChampSelect")]);
        api.fail("/broken", 500);

        assert_eq!(api.get_json("/phase").await.unwrap(), json!("Lobby"));
        assert_eq!(api.get_json("/phase").await.unwrap(), json!("ChampSelect"));
        assert_eq!(api.get_json("/phase").await.unwrap(), json!("ChampSelect"));
        assert!(matches!(
            api.get_json("/broken").await,
            Err(PollError::Status { status: 500, .. })
        ));
        assert!(api.get_json("/unknown").await.is_err());
        assert_eq!(api.calls("/phase"), 3);
    }

    #[tokio::test]
    async fn test_discovery_follows_process() {
        let discovery = ScriptedDiscovery::new(ScriptedApi::new());
        assert!(matches!(discovery.discover(1).await, Err(DiscoveryError::NotRunning)));

        discovery.set_running(Some(10));
        discovery.fail_next(1);
        assert!(discovery.discover(1).await.is_err());
        let api = discovery.discover(1).await.unwrap();
        assert_eq!(api.pid(), Some(10));
        assert_eq!(discovery.attempts(), 3);
    }
}
