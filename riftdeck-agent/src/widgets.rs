//! Widget kinds and what they display
//!
//! Closed set of key types. Each kind declares which logical data types it
//! consumes and turns the cached responses into a render payload.

use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::poller::ResponseCache;
use crate::render::{RenderPayload, WidgetId};
use crate::store::{last_known_key, StateStore};

/// Logical data types produced by the pollers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Summoner,
    Gameflow,
    ChampSelect,
    Ranked,
    Wallet,
    Live,
}

impl LogicalType {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicalType::Summoner => "summoner",
            LogicalType::Gameflow => "gameflow",
            LogicalType::ChampSelect => "champ-select",
            LogicalType::Ranked => "ranked",
            LogicalType::Wallet => "wallet",
            LogicalType::Live => "live",
        }
    }
}

impl FromStr for LogicalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summoner" => Ok(LogicalType::Summoner),
            "gameflow" => Ok(LogicalType::Gameflow),
            "champ-select" => Ok(LogicalType::ChampSelect),
            "ranked" => Ok(LogicalType::Ranked),
            "wallet" => Ok(LogicalType::Wallet),
            "live" => Ok(LogicalType::Live),
            other => Err(format!("unknown logical type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    Summoner,
    Rank,
    Wallet,
    GamePhase,
    ChampSelect,
    LiveKda,
    LiveGold,
    LiveCreepScore,
}

impl WidgetKind {
    pub const ALL: [WidgetKind; 8] = [
        WidgetKind::Summoner,
        WidgetKind::Rank,
        WidgetKind::Wallet,
        WidgetKind::GamePhase,
        WidgetKind::ChampSelect,
        WidgetKind::LiveKda,
        WidgetKind::LiveGold,
        WidgetKind::LiveCreepScore,
    ];

    /// Parse a host widget type; reverse-DNS prefixes are ignored
    /// (`com.riftdeck.rank` is `rank`)
    pub fn from_type(kind: &str) -> Option<Self> {
        let short = kind.rsplit('.').next().unwrap_or(kind);
        Self::ALL.into_iter().find(|k| k.type_name() == short)
    }

    pub fn type_name(self) -> &'static str {
        match self {
            WidgetKind::Summoner => "summoner",
            WidgetKind::Rank => "rank",
            WidgetKind::Wallet => "wallet",
            WidgetKind::GamePhase => "game-phase",
            WidgetKind::ChampSelect => "champ-select",
            WidgetKind::LiveKda => "live-kda",
            WidgetKind::LiveGold => "live-gold",
            WidgetKind::LiveCreepScore => "live-cs",
        }
    }

    pub fn sources(self) -> &'static [LogicalType] {
        match self {
            WidgetKind::Summoner => &[LogicalType::Summoner],
            WidgetKind::Rank => &[LogicalType::Ranked],
            WidgetKind::Wallet => &[LogicalType::Wallet],
            WidgetKind::GamePhase => &[LogicalType::Gameflow],
            WidgetKind::ChampSelect => &[LogicalType::ChampSelect, LogicalType::Gameflow],
            WidgetKind::LiveKda | WidgetKind::LiveGold | WidgetKind::LiveCreepScore => {
                &[LogicalType::Live]
            }
        }
    }

    pub fn consumes(self, logical_type: LogicalType) -> bool {
        self.sources().contains(&logical_type)
    }

    pub fn is_live(self) -> bool {
        matches!(self, WidgetKind::LiveKda | WidgetKind::LiveGold | WidgetKind::LiveCreepScore)
    }

    pub fn is_phase_dependent(self) -> bool {
        matches!(self, WidgetKind::GamePhase | WidgetKind::ChampSelect) || self.is_live()
    }

    /// Current content of this kind from the cached responses
    pub fn render(self, ctx: &RenderContext<'_>) -> RenderPayload {
        match self {
            WidgetKind::Summoner => render_summoner(ctx),
            WidgetKind::Rank => render_rank(ctx),
            WidgetKind::Wallet => render_wallet(ctx),
            WidgetKind::GamePhase => render_phase(ctx),
            WidgetKind::ChampSelect => render_champ_select(ctx),
            WidgetKind::LiveKda | WidgetKind::LiveGold | WidgetKind::LiveCreepScore => {
                render_live(self, ctx)
            }
        }
    }
}

pub struct RenderContext<'a> {
    pub cache: &'a ResponseCache,
    pub in_game: bool,
    /// Queue selected for a rank widget
    pub rank_queue: Option<&'a str>,
    /// Persisted payloads of earlier sessions, shown until the first poll
    pub last_known: Option<&'a StateStore>,
}

impl RenderContext<'_> {
    fn data(&self, logical_type: LogicalType) -> Option<Value> {
        if let Some(value) = self.cache.payload(logical_type.as_str()) {
            return Some(value);
        }
        // live stats belong to the running match only
        if logical_type == LogicalType::Live {
            return None;
        }
        self.last_known?.cache_get(&last_known_key(logical_type.as_str()))
    }
}

fn str_field<'v>(value: &'v Value, names: &[&str]) -> Option<&'v str> {
    names.iter().find_map(|n| value.get(*n).and_then(Value::as_str)).filter(|s| !s.is_empty())
}

fn num_field(value: &Value, names: &[&str]) -> Option<i64> {
    names.iter().find_map(|n| {
        let v = value.get(*n)?;
        v.as_i64().or_else(|| v.as_f64().map(|f| f.floor() as i64))
    })
}

fn render_summoner(ctx: &RenderContext<'_>) -> RenderPayload {
    let Some(summoner) = ctx.data(LogicalType::Summoner) else {
        return RenderPayload::loading();
    };
    let name = str_field(&summoner, &["gameName", "displayName"]).unwrap_or("Summoner");
    let mut lines = Vec::new();
    if let Some(level) = num_field(&summoner, &["summonerLevel"]) {
        lines.push(format!("Level {}", level));
    }
    match num_field(&summoner, &["profileIconId"]) {
        Some(icon) => RenderPayload::image(name, lines, format!("profileicon/{}", icon)),
        None => RenderPayload::text(name, lines),
    }
}

// ---- ranked ----

pub const QUEUE_PRIORITY: [&str; 4] =
    ["RANKED_SOLO_5x5", "RANKED_FLEX_SR", "RANKED_TFT", "RANKED_TFT_DOUBLE_UP"];

pub fn queue_label(queue: &str) -> &str {
    match queue {
        "RANKED_SOLO_5x5" => "Solo/Duo",
        "RANKED_FLEX_SR" => "Flex",
        "RANKED_TFT" => "TFT",
        "RANKED_TFT_DOUBLE_UP" => "Double Up",
        other => other,
    }
}

/// Queue types present in a ranked payload, priority queues first
pub fn available_queues(ranked: &Value) -> Vec<String> {
    let mut queues: Vec<String> = ranked
        .get("queues")
        .and_then(Value::as_array)
        .map(|qs| {
            qs.iter()
                .filter_map(|q| q.get("queueType").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    queues.sort_by_key(|q| QUEUE_PRIORITY.iter().position(|p| *p == q.as_str()).unwrap_or(QUEUE_PRIORITY.len()));
    queues.dedup();
    queues
}

fn render_rank(ctx: &RenderContext<'_>) -> RenderPayload {
    let Some(ranked) = ctx.data(LogicalType::Ranked) else {
        return RenderPayload::loading();
    };
    let queue = ctx.rank_queue.unwrap_or(QUEUE_PRIORITY[0]);
    let label = queue_label(queue).to_string();

    let entry = ranked
        .get("queues")
        .and_then(Value::as_array)
        .and_then(|qs| qs.iter().find(|q| q.get("queueType").and_then(Value::as_str) == Some(queue)));
    let Some(entry) = entry else {
        return RenderPayload::text("Unranked", vec![label]);
    };

    let tier = str_field(entry, &["tier"]).unwrap_or("NONE");
    if tier == "NONE" {
        return RenderPayload::text("Unranked", vec![label]);
    }
    let division = str_field(entry, &["division"]).filter(|d| *d != "NA").unwrap_or("");
    let title = format!("{} {}", title_case(tier), division).trim().to_string();
    let mut lines = vec![label];
    if let Some(lp) = num_field(entry, &["leaguePoints"]) {
        lines.push(format!("{} LP", lp));
    }
    if let (Some(w), Some(l)) = (num_field(entry, &["wins"]), num_field(entry, &["losses"])) {
        lines.push(format!("{}W {}L", w, l));
    }
    RenderPayload::image(title, lines, format!("ranked-emblem/{}", tier.to_lowercase()))
}

fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn render_wallet(ctx: &RenderContext<'_>) -> RenderPayload {
    let Some(wallet) = ctx.data(LogicalType::Wallet) else {
        return RenderPayload::loading();
    };
    let mut lines = Vec::new();
    if let Some(rp) = num_field(&wallet, &["rp", "RP"]) {
        lines.push(format!("{} RP", rp));
    }
    if let Some(be) = num_field(&wallet, &["ip", "lol_blue_essence", "be"]) {
        lines.push(format!("{} BE", be));
    }
    RenderPayload::text("Wallet", lines)
}

fn phase_label(phase: &str) -> String {
    match phase {
        "None" => "Idle".to_string(),
        "ChampSelect" => "Champ Select".to_string(),
        "InProgress" => "In Game".to_string(),
        "ReadyCheck" => "Ready Check".to_string(),
        "WaitingForStats" | "PreEndOfGame" | "EndOfGame" => "Post Game".to_string(),
        other => other.to_string(),
    }
}

fn current_phase(ctx: &RenderContext<'_>) -> Option<String> {
    ctx.data(LogicalType::Gameflow).and_then(|v| v.as_str().map(str::to_string))
}

fn render_phase(ctx: &RenderContext<'_>) -> RenderPayload {
    match current_phase(ctx) {
        Some(phase) => RenderPayload::text("Phase", vec![phase_label(&phase)]),
        None => RenderPayload::loading(),
    }
}

fn render_champ_select(ctx: &RenderContext<'_>) -> RenderPayload {
    if current_phase(ctx).as_deref() != Some("ChampSelect") {
        return RenderPayload::text("Champ Select", vec!["Not in champ select".to_string()]);
    }
    let Some(session) = ctx.data(LogicalType::ChampSelect) else {
        return RenderPayload::loading();
    };

    let mut lines = Vec::new();
    if let Some(timer) = session.get("timer") {
        if let Some(phase) = str_field(timer, &["phase"]) {
            lines.push(title_case(phase));
        }
        if let Some(ms) = num_field(timer, &["adjustedTimeLeftInPhase"]) {
            lines.push(format!("{}s", ms / 1000));
        }
    }
    let local_cell = num_field(&session, &["localPlayerCellId"]);
    let champion = session
        .get("myTeam")
        .and_then(Value::as_array)
        .and_then(|team| team.iter().find(|m| num_field(m, &["cellId"]) == local_cell))
        .and_then(|me| num_field(me, &["championId"]))
        .filter(|id| *id > 0);
    match champion {
        Some(id) => RenderPayload::image("Champ Select", lines, format!("champion/{}", id)),
        None => RenderPayload::text("Champ Select", lines),
    }
}

/// Scoreboard entry of the local player in an allgamedata payload
fn local_player(live: &Value) -> Option<&Value> {
    let active = live.get("activePlayer")?;
    let name = str_field(active, &["riotId", "summonerName"])?;
    live.get("allPlayers")?
        .as_array()?
        .iter()
        .find(|p| str_field(p, &["riotId", "summonerName"]) == Some(name))
}

fn render_live(kind: WidgetKind, ctx: &RenderContext<'_>) -> RenderPayload {
    if !ctx.in_game {
        return RenderPayload::not_in_game();
    }
    let Some(live) = ctx.data(LogicalType::Live) else {
        return RenderPayload::loading();
    };

    match kind {
        WidgetKind::LiveGold => {
            let gold = live
                .get("activePlayer")
                .and_then(|a| num_field(a, &["currentGold"]))
                .unwrap_or(0);
            RenderPayload::text("Gold", vec![gold.to_string()])
        }
        WidgetKind::LiveKda => {
            let scores = local_player(&live).and_then(|p| p.get("scores"));
            let stat = |name: &str| scores.and_then(|s| num_field(s, &[name])).unwrap_or(0);
            RenderPayload::text(
                "KDA",
                vec![format!("{}/{}/{}", stat("kills"), stat("deaths"), stat("assists"))],
            )
        }
        _ => {
            let cs = local_player(&live)
                .and_then(|p| p.get("scores"))
                .and_then(|s| num_field(s, &["creepScore"]))
                .unwrap_or(0);
            RenderPayload::text("CS", vec![cs.to_string()])
        }
    }
}

// ---- rank queue book ----

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueSlot {
    default: String,
    current: String,
}

/// Default-queue assignment and cycling state of rank widgets
#[derive(Debug, Default)]
pub struct RankQueueBook {
    slots: BTreeMap<WidgetId, QueueSlot>,
}

impl RankQueueBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the default queue of a (re)registered rank widget.
    /// An explicit setting always wins; otherwise the first priority queue
    /// no other rank widget holds, or the first one when all are held.
    pub fn assign(&mut self, id: &WidgetId, explicit: Option<&str>) -> String {
        let queue = match explicit {
            Some(q) => q.to_string(),
            None => {
                let held: Vec<&str> = self
                    .slots
                    .iter()
                    .filter(|(other, _)| *other != id)
                    .map(|(_, slot)| slot.default.as_str())
                    .collect();
                QUEUE_PRIORITY
                    .iter()
                    .find(|q| !held.contains(*q))
                    .unwrap_or(&QUEUE_PRIORITY[0])
                    .to_string()
            }
        };
        self.slots.insert(id.clone(), QueueSlot { default: queue.clone(), current: queue.clone() });
        queue
    }

    pub fn release(&mut self, id: &WidgetId) -> Option<String> {
        self.slots.remove(id).map(|s| s.default)
    }

    /// Drop slots of widgets that no longer exist
    pub fn retain(&mut self, mut keep: impl FnMut(&WidgetId) -> bool) {
        self.slots.retain(|id, _| keep(id));
    }

    /// Reapply a persisted selection; `resolve` falls back to the default
    /// if the queue is gone from the data
    pub fn restore(&mut self, id: &WidgetId, queue: &str) -> bool {
        match self.slots.get_mut(id) {
            Some(slot) => {
                slot.current = queue.to_string();
                true
            }
            None => false,
        }
    }

    pub fn current(&self, id: &WidgetId) -> Option<&str> {
        self.slots.get(id).map(|s| s.current.as_str())
    }

    /// Queue to show given the queues present in the data; falls back to
    /// the default when the selected queue disappeared
    pub fn resolve(&mut self, id: &WidgetId, available: &[String]) -> Option<String> {
        let slot = self.slots.get_mut(id)?;
        if !available.is_empty() && !available.contains(&slot.current) {
            slot.current = slot.default.clone();
        }
        Some(slot.current.clone())
    }

    /// Advance to the next queue present in the data
    pub fn cycle(&mut self, id: &WidgetId, available: &[String]) -> Option<String> {
        let slot = self.slots.get_mut(id)?;
        if available.is_empty() {
            return Some(slot.current.clone());
        }
        slot.current = match available.iter().position(|q| *q == slot.current) {
            Some(i) => available[(i + 1) % available.len()].clone(),
            None => slot.default.clone(),
        };
        Some(slot.current.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
