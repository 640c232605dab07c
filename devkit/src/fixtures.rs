/*!
Payloads de test au format du client

Chemins des endpoints par défaut et builders JSON pour chaque type de donnée.
*/

use serde_json::{json, Value};

pub const SUMMONER_PATH: &str = "/lol-summoner/v1/current-summoner";
pub const GAMEFLOW_PATH: &str = "/lol-gameflow/v1/gameflow-phase";
pub const CHAMP_SELECT_PATH: &str = "/lol-champ-select/v1/session";
pub const RANKED_PATH: &str = "/lol-ranked/v1/current-ranked-stats";
pub const WALLET_PATH: &str = "/lol-store/v1/wallet";
pub const LIVE_PATH: &str = "/liveclientdata/allgamedata";

pub fn summoner(name: &str, level: u32) -> Value {
    json!({
        "gameName": name,
        "tagLine": "EUW",
        "summonerLevel": level,
        "profileIconId": 29
    })
}

pub fn gameflow(phase: &str) -> Value {
    json!(phase)
}

/// `(queueType, tier, division, lp)`
pub fn ranked(queues: &[(&str, &str, &str, u32)]) -> Value {
    let queues: Vec<Value> = queues
        .iter()
        .map(|(queue, tier, division, lp)| {
            json!({
                "queueType": queue,
                "tier": tier,
                "division": division,
                "leaguePoints": lp,
                "wins": 10,
                "losses": 8
            })
        })
        .collect();
    json!({ "queues": queues })
}

pub fn wallet(rp: u32, blue_essence: u32) -> Value {
    json!({ "rp": rp, "ip": blue_essence })
}

pub fn live_game(name: &str, kills: u32, deaths: u32, assists: u32, cs: u32, gold: f64) -> Value {
    json!({
        "activePlayer": { "riotId": name, "currentGold": gold },
        "allPlayers": [
            {
                "riotId": name,
                "scores": { "kills": kills, "deaths": deaths, "assists": assists, "creepScore": cs }
            }
        ],
        "gameData": { "gameTime": 600.0 }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranked_builder() {
        let value = ranked(&[("RANKED_SOLO_5x5", "GOLD", "II", 40)]);
        assert_eq!(value["queues"][0]["tier"], "GOLD");
        assert_eq!(value["queues"][0]["leaguePoints"], 40);
    }
}
