//! Built-in scenario catalog.
//!
//! A scenario is the binary question the session's market trades on, the
//! NPC cast that comments on it, and the insider clues handed out over the
//! game. The hidden outcome is drawn when a scenario is instantiated.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::Outcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Npc {
    pub id: String,
    pub name: String,
    pub role: String,
}

/// NPC feed post published on a fixed day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub day: u32,
    pub npc_id: String,
    pub content: String,
}

/// Private hint sent to one agent on a fixed day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClueTemplate {
    pub day: u32,
    pub npc_id: String,
    pub hints_yes: String,
    pub hints_no: String,
    /// False for planted misinformation.
    pub truthful: bool,
}

impl ClueTemplate {
    /// Text for this clue given the hidden outcome.
    pub fn render(&self, outcome: Outcome) -> (String, bool) {
        let points_to = if self.truthful { outcome } else { outcome.opposite() };
        let text = match points_to {
            Outcome::Yes => self.hints_yes.clone(),
            Outcome::No => self.hints_no.clone(),
        };
        (text, self.truthful)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    pub question: String,
    pub description: String,
    /// Hidden outcome. Never exposed before reveal.
    pub outcome: Outcome,
    pub npcs: Vec<Npc>,
    pub posts: Vec<ScheduledPost>,
    pub clues: Vec<ClueTemplate>,
}

impl Scenario {
    pub fn npc_name<'a>(&'a self, npc_id: &'a str) -> &'a str {
        self.npcs
            .iter()
            .find(|n| n.id == npc_id)
            .map(|n| n.name.as_str())
            .unwrap_or(npc_id)
    }
}

fn npc(id: &str, name: &str, role: &str) -> Npc {
    Npc { id: id.into(), name: name.into(), role: role.into() }
}

fn post(day: u32, npc_id: &str, content: &str) -> ScheduledPost {
    ScheduledPost { day, npc_id: npc_id.into(), content: content.into() }
}

fn clue(day: u32, npc_id: &str, yes: &str, no: &str, truthful: bool) -> ClueTemplate {
    ClueTemplate {
        day,
        npc_id: npc_id.into(),
        hints_yes: yes.into(),
        hints_no: no.into(),
        truthful,
    }
}

/// Every built-in scenario, outcome defaulted to YES.
pub fn catalog() -> Vec<Scenario> {
    vec![
        Scenario {
            id: "incitatus-consul".into(),
            title: "The Emperor's Horse".into(),
            question: "Will the Emperor name his horse Incitatus consul before the month ends?"
                .into(),
            description: "Rumours from the Palatine say the Emperor's favourite stallion \
                          now has a marble stall and a household of slaves."
                .into(),
            outcome: Outcome::Yes,
            npcs: vec![
                npc("npc:senator", "Senator Vinicianus", "Senate insider"),
                npc("npc:groom", "Eutychus", "Head groom of the imperial stables"),
                npc("npc:herald", "The Herald", "Public announcements"),
            ],
            posts: vec![
                post(2, "npc:herald", "The Emperor dines with his horse tonight. Senators are invited."),
                post(9, "npc:senator", "The Senate will never stand for it. Never."),
                post(17, "npc:groom", "They measured Incitatus for a purple blanket today."),
                post(25, "npc:herald", "A decree on the consulship is expected within days."),
            ],
            clues: vec![
                clue(
                    5,
                    "npc:groom",
                    "The stable scribes are drafting a consular oath. For a horse.",
                    "The Emperor shouted at Incitatus this morning. He sulks in the Palace.",
                    true,
                ),
                clue(
                    12,
                    "npc:senator",
                    "The praetors have quietly agreed to ratify anything he proposes.",
                    "Half the Senate has sworn to walk out if the horse is named.",
                    false,
                ),
                clue(
                    21,
                    "npc:groom",
                    "A consul's toga was delivered to the stables.",
                    "The consular lists were sealed yesterday. No horses on them.",
                    true,
                ),
            ],
        },
        Scenario {
            id: "grain-fleet".into(),
            title: "The Grain Fleet".into(),
            question: "Will the Alexandrian grain fleet reach Ostia before the games end?"
                .into(),
            description: "Rome has three weeks of bread left. The fleet was last sighted \
                          off Crete in bad weather."
                .into(),
            outcome: Outcome::Yes,
            npcs: vec![
                npc("npc:prefect", "Prefect of the Annona", "Grain supply"),
                npc("npc:sailor", "Old Nikias", "Retired helmsman"),
            ],
            posts: vec![
                post(3, "npc:prefect", "The granaries are full. There is nothing to worry about."),
                post(14, "npc:sailor", "Storm season came early this year. I have seen worse."),
                post(24, "npc:prefect", "Bread rations will be adjusted. Temporarily."),
            ],
            clues: vec![
                clue(
                    6,
                    "npc:sailor",
                    "A fast trireme reports the fleet rounding Sicily.",
                    "Wreckage with Alexandrian markings washed up at Malta.",
                    true,
                ),
                clue(
                    18,
                    "npc:prefect",
                    "Ostia's harbourmaster has cleared every berth.",
                    "The Prefect is buying Sardinian grain at any price.",
                    true,
                ),
            ],
        },
    ]
}

/// Pick a scenario and draw its hidden outcome.
pub fn pick(rng: &mut StdRng) -> Scenario {
    let mut all = catalog();
    let idx = rng.gen_range(0..all.len());
    let mut scenario = all.swap_remove(idx);
    scenario.outcome = if rng.gen_bool(0.5) { Outcome::Yes } else { Outcome::No };
    scenario
}
