pub mod codec;
pub mod palette;
pub mod style;

use chrono::{DateTime, Utc};
use geojson::Feature;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Geographic coordinate as (longitude, latitude)
pub type LonLat = (f64, f64);

/// Ids arrive from the store as JSON numbers or strings; both are kept as text
macro_rules! record_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Repr {
                    Int(i64),
                    Text(String),
                }

                Ok(match Repr::deserialize(deserializer)? {
                    Repr::Int(n) => Self(n.to_string()),
                    Repr::Text(s) => Self(s),
                })
            }
        }
    };
}

record_id!(TerritoryId);
record_id!(TeamId);

/// Client-side id for a territory the store has not acknowledged yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProvisionalId(pub u64);

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provisional-{}", self.0)
    }
}

/// What a drawn shape is bound to: a stored record or a pending create
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TerritoryKey {
    Stored(TerritoryId),
    Provisional(ProvisionalId),
}

impl TerritoryKey {
    pub fn stored_id(&self) -> Option<&TerritoryId> {
        match self {
            TerritoryKey::Stored(id) => Some(id),
            TerritoryKey::Provisional(_) => None,
        }
    }
}

impl fmt::Display for TerritoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerritoryKey::Stored(id) => write!(f, "#{id}"),
            TerritoryKey::Provisional(p) => p.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerritoryStatus {
    #[default]
    Active,
    Inactive,
    Completed,
}

impl TerritoryStatus {
    pub const ALL: [TerritoryStatus; 3] = [
        TerritoryStatus::Active,
        TerritoryStatus::Inactive,
        TerritoryStatus::Completed,
    ];

    /// Next status in the edit form's cycle; any status may follow any other
    pub fn cycle(self) -> Self {
        match self {
            TerritoryStatus::Active => TerritoryStatus::Inactive,
            TerritoryStatus::Inactive => TerritoryStatus::Completed,
            TerritoryStatus::Completed => TerritoryStatus::Active,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TerritoryStatus::Active => "active",
            TerritoryStatus::Inactive => "inactive",
            TerritoryStatus::Completed => "completed",
        }
    }
}

/// A territory record as held by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Territory {
    pub id: TerritoryId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw GeoJSON; decoded lazily so one corrupt record cannot poison the list
    #[serde(default)]
    pub geometry: Option<serde_json::Value>,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub status: TerritoryStatus,
    #[serde(default)]
    pub assigned_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Territory {
    /// Apply a partial update. `createdBy` and `createdAt` are never touched.
    pub fn apply_patch(&mut self, patch: &TerritoryPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(geometry) = &patch.geometry {
            self.geometry = serde_json::to_value(geometry).ok();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        if let Some(team_id) = &patch.team_id {
            self.team_id = team_id.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(assigned) = patch.assigned_date {
            self.assigned_date = assigned;
        }
        if let Some(completed) = patch.completed_date {
            self.completed_date = completed;
        }
    }
}

/// Body of `POST /territories`. Carries no id: the store assigns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTerritory {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub geometry: Feature,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TerritoryStatus>,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_date: Option<DateTime<Utc>>,
}

impl NewTerritory {
    /// Materialize the record the store would hold for this body
    pub fn into_territory(self, id: TerritoryId, created_at: DateTime<Utc>) -> Territory {
        Territory {
            id,
            name: self.name,
            description: self.description,
            geometry: serde_json::to_value(&self.geometry).ok(),
            color: self.color,
            team_id: self.team_id,
            status: self.status.unwrap_or_default(),
            assigned_date: self.assigned_date,
            completed_date: None,
            created_by: self.created_by,
            created_at: Some(created_at),
        }
    }
}

/// Body of `PUT /territories/{id}`: only the fields being changed.
///
/// Nullable fields use `Option<Option<_>>` so `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerritoryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Feature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<Option<TeamId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TerritoryStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_date: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<Option<DateTime<Utc>>>,
}

impl TerritoryPatch {
    pub fn geometry(feature: Feature) -> Self {
        Self {
            geometry: Some(feature),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fold a later patch into this one; fields set in `later` win
    pub fn merge(&mut self, later: TerritoryPatch) {
        if later.name.is_some() {
            self.name = later.name;
        }
        if later.description.is_some() {
            self.description = later.description;
        }
        if later.geometry.is_some() {
            self.geometry = later.geometry;
        }
        if later.color.is_some() {
            self.color = later.color;
        }
        if later.team_id.is_some() {
            self.team_id = later.team_id;
        }
        if later.status.is_some() {
            self.status = later.status;
        }
        if later.assigned_date.is_some() {
            self.assigned_date = later.assigned_date;
        }
        if later.completed_date.is_some() {
            self.completed_date = later.completed_date;
        }
    }

    /// Apply this patch to a not-yet-created body
    pub fn apply_to_draft(&self, draft: &mut NewTerritory) {
        if let Some(name) = &self.name {
            draft.name = name.clone();
        }
        if let Some(description) = &self.description {
            draft.description = description.clone();
        }
        if let Some(geometry) = &self.geometry {
            draft.geometry = geometry.clone();
        }
        if let Some(color) = &self.color {
            draft.color = color.clone();
        }
        if let Some(team_id) = &self.team_id {
            draft.team_id = team_id.clone();
        }
        if let Some(status) = self.status {
            draft.status = Some(status);
        }
        if let Some(assigned) = self.assigned_date {
            draft.assigned_date = assigned;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

/// Read-only team list for resolving `teamId` to a display name
#[derive(Debug, Clone, Default)]
pub struct TeamDirectory {
    teams: Vec<Team>,
}

impl TeamDirectory {
    pub fn new(teams: Vec<Team>) -> Self {
        Self { teams }
    }

    pub fn name_of(&self, id: &TeamId) -> Option<&str> {
        self.teams
            .iter()
            .find(|t| &t.id == id)
            .map(|t| t.name.as_str())
    }

    /// Team after `current` in list order; wraps to unassigned after the last
    pub fn next_after(&self, current: Option<&TeamId>) -> Option<TeamId> {
        match current {
            None => self.teams.first().map(|t| t.id.clone()),
            Some(id) => {
                let pos = self.teams.iter().position(|t| &t.id == id)?;
                self.teams.get(pos + 1).map(|t| t.id.clone())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}
