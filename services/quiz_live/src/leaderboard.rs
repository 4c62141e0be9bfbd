use hub_api::{kinds, Event, Topic};
use livehub::WelcomeHook;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// One user's cumulative score.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Standing {
    pub user_id: String,
    pub name: String,
    pub score: i64,
}

/// In-memory cumulative scores, ranked on demand.
pub struct Scoreboard {
    scores: Mutex<HashMap<String, Standing>>,
    size: usize,
}

impl Scoreboard {
    pub fn new(size: usize) -> Self {
        Self {
            scores: Mutex::new(HashMap::new()),
            size,
        }
    }

    /// Add `points` to a user's total and return the new total. The latest
    /// non-empty name wins.
    pub fn record(&self, user_id: &str, name: &str, points: i64) -> i64 {
        let mut guard = self.scores.lock();
        let entry = guard.entry(user_id.to_string()).or_insert_with(|| Standing {
            user_id: user_id.to_string(),
            name: name.to_string(),
            score: 0,
        });
        if !name.is_empty() {
            entry.name = name.to_string();
        }
        entry.score = entry.score.saturating_add(points);
        entry.score
    }

    /// Highest scores first; ties ordered by user id.
    pub fn top(&self) -> Vec<Standing> {
        let mut all: Vec<Standing> = self.scores.lock().values().cloned().collect();
        all.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.user_id.cmp(&b.user_id)));
        all.truncate(self.size);
        all
    }

    /// Current leaderboard as a global event.
    pub fn snapshot(&self) -> Event {
        Event::global(
            kinds::LEADERBOARD_UPDATE,
            serde_json::to_value(self.top()).unwrap_or_default(),
        )
    }
}

impl WelcomeHook for Scoreboard {
    fn welcome(&self, _topic: &Topic) -> Option<Event> {
        Some(self.snapshot())
    }
}
