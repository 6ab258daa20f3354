use crate::store::{StoreError, TerritoryStore};
use crate::territory::codec::{to_feature, NativeShape};
use crate::territory::{
    NewTerritory, Team, TeamId, Territory, TerritoryId, TerritoryPatch, TerritoryStatus,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    territories: Vec<Territory>,
    teams: Vec<Team>,
    next_id: u64,
}

/// In-process Territory Store for offline mode and tests
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    /// When set, every mutating call fails with a 503
    pub fail_mutations: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
            fail_mutations: AtomicBool::new(false),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_teams(self, teams: Vec<Team>) -> Self {
        self.lock().teams = teams;
        self
    }

    /// A few teams and territories around lower Manhattan
    pub fn with_sample_data() -> Self {
        let store = Self::new().with_teams(vec![
            Team { id: TeamId::from(1), name: "North Crew".into() },
            Team { id: TeamId::from(2), name: "Harbor Crew".into() },
            Team { id: TeamId::from(3), name: "Night Shift".into() },
        ]);

        let samples = [
            ("Financial District", NativeShape::rectangle((-74.0150, 40.7040), (-74.0050, 40.7110)), "#4363d8", TerritoryStatus::Active, Some(1)),
            (
                "Chinatown",
                NativeShape::Polygon(vec![
                    (-74.0010, 40.7130),
                    (-73.9950, 40.7125),
                    (-73.9935, 40.7175),
                    (-73.9990, 40.7195),
                ]),
                "#e6194b",
                TerritoryStatus::Inactive,
                Some(2),
            ),
            ("Battery Park", NativeShape::rectangle((-74.0190, 40.7010), (-74.0130, 40.7065)), "#3cb44b", TerritoryStatus::Completed, None),
        ];

        for (name, shape, color, status, team) in samples {
            let body = NewTerritory {
                name: name.to_string(),
                description: None,
                geometry: to_feature(&shape),
                color: color.to_string(),
                team_id: team.map(TeamId::from),
                status: Some(status),
                created_by: "seed".to_string(),
                assigned_date: team.map(|_| Utc::now()),
            };
            // Seeding goes around the failure switch
            store.insert(body);
        }
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panic while holding the lock leaves plain data behind; keep serving it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, body: NewTerritory) -> Territory {
        let mut state = self.lock();
        let id = TerritoryId::from(state.next_id);
        state.next_id += 1;
        let territory = body.into_territory(id, Utc::now());
        state.territories.push(territory.clone());
        territory
    }

    /// Change a record behind the engine's back, as another client would
    pub fn external_update(&self, id: &TerritoryId, patch: &TerritoryPatch) -> bool {
        let mut state = self.lock();
        match state.territories.iter_mut().find(|t| &t.id == id) {
            Some(t) => {
                t.apply_patch(patch);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<Territory> {
        self.lock().territories.clone()
    }

    fn check_mutation(&self) -> Result<(), StoreError> {
        if self.fail_mutations.load(Ordering::Relaxed) {
            return Err(StoreError::Status {
                status: 503,
                body: "store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl TerritoryStore for MemoryStore {
    fn list(&self) -> Result<Vec<Territory>, StoreError> {
        Ok(self.snapshot())
    }

    fn create(&self, body: &NewTerritory) -> Result<Territory, StoreError> {
        self.check_mutation()?;
        Ok(self.insert(body.clone()))
    }

    fn update(&self, id: &TerritoryId, patch: &TerritoryPatch) -> Result<Territory, StoreError> {
        self.check_mutation()?;
        let mut state = self.lock();
        let territory = state
            .territories
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        territory.apply_patch(patch);
        Ok(territory.clone())
    }

    fn delete(&self, id: &TerritoryId) -> Result<(), StoreError> {
        self.check_mutation()?;
        let mut state = self.lock();
        let before = state.territories.len();
        state.territories.retain(|t| &t.id != id);
        if state.territories.len() == before {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    fn teams(&self) -> Result<Vec<Team>, StoreError> {
        Ok(self.lock().teams.clone())
    }
}
