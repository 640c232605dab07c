/*!
Mock de la surface de rendu

Remplace le bridge stdio: enregistre tous les draws (texte et image) et
permet de simuler des échecs, ponctuels ou permanents, par widget.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use riftdeck_agent::error::RenderError;
use riftdeck_agent::render::{DeckSurface, WidgetId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub widget: WidgetId,
    pub title: String,
    pub lines: Vec<String>,
    pub image: Option<String>,
    pub at: Instant,
    pub ok: bool,
}

#[derive(Default)]
struct DeckState {
    draws: Vec<DrawRecord>,
    /// Échecs consommés un par un, tous widgets confondus
    next_failures: VecDeque<String>,
    /// Échecs permanents par widget
    broken: HashMap<WidgetId, String>,
}

/// Surface qui enregistre les draws au lieu de les envoyer à l'hôte
#[derive(Clone, Default)]
pub struct MockDeckHost {
    state: Arc<Mutex<DeckState>>,
}

impl MockDeckHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Les `count` prochains draws échouent avec `message`
    pub fn fail_next(&self, count: usize, message: &str) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.next_failures.push_back(message.to_string());
        }
    }

    /// Tous les draws de ce widget échouent, sauf le placeholder d'erreur
    pub fn break_widget(&self, widget: &WidgetId, message: &str) {
        self.state.lock().broken.insert(widget.clone(), message.to_string());
    }

    pub fn repair_widget(&self, widget: &WidgetId) {
        self.state.lock().broken.remove(widget);
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.lock().draws.clone()
    }

    pub fn draws_for(&self, widget: &WidgetId) -> Vec<DrawRecord> {
        self.state
            .lock()
            .draws
            .iter()
            .filter(|d| &d.widget == widget)
            .cloned()
            .collect()
    }

    /// Dernier draw réussi d'un widget
    pub fn last_for(&self, widget: &WidgetId) -> Option<DrawRecord> {
        self.state
            .lock()
            .draws
            .iter()
            .rev()
            .find(|d| &d.widget == widget && d.ok)
            .cloned()
    }

    pub fn count_titled(&self, title: &str) -> usize {
        self.state.lock().draws.iter().filter(|d| d.ok && d.title == title).count()
    }

    pub fn clear(&self) {
        self.state.lock().draws.clear();
    }

    fn record(
        &self,
        widget: &WidgetId,
        title: &str,
        lines: &[String],
        image: Option<&str>,
    ) -> Result<(), RenderError> {
        let mut state = self.state.lock();
        let failure = match state.broken.get(widget) {
            Some(message) if title != "Unavailable" => Some(message.clone()),
            _ => state.next_failures.pop_front(),
        };

        state.draws.push(DrawRecord {
            widget: widget.clone(),
            title: title.to_string(),
            lines: lines.to_vec(),
            image: image.map(str::to_string),
            at: Instant::now(),
            ok: failure.is_none(),
        });

        match failure {
            Some(message) => {
                log::debug!("[MOCK] draw {} failed: {}", widget, message);
                Err(RenderError::new(message))
            }
            None => {
                log::debug!("[MOCK] draw {} -> {}", widget, title);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DeckSurface for MockDeckHost {
    async fn draw_text(&self, widget: &WidgetId, title: &str, lines: &[String]) -> Result<(), RenderError> {
        self.record(widget, title, lines, None)
    }

    async fn draw_image(
        &self,
        widget: &WidgetId,
        title: &str,
        lines: &[String],
        image_data: &str,
    ) -> Result<(), RenderError> {
        self.record(widget, title, lines, Some(image_data))
    }
}
