//! Identity resolution over the columnar event tables.
//!
//! Observation records from every event table feed a union-find keyed on
//! the disjoint union of Steam and EOS identifiers. A record carrying both
//! ids unions the two keys; a record with one id refreshes timestamps on
//! its class. Identity tables are materialized asynchronously; lookups fall
//! back to an inline union-find over raw events while a rebuild is pending.

use crate::error::IdentityError;
use crate::union_find::{IdentityKey, UnionFind};
use aegis_types::{EosId, SteamId};
use chrono::{DateTime, Utc};
use persistence::{
    ColumnarStore, CombatStats, IdentifierKind, Observation, ObservationRole,
    PlayerIdentityRecord,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether an identity came from the materialized table or an inline
/// union-find over raw events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Resolved,
    Pending,
}

/// A canonical player identity.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub canonical_id: String,
    pub primary_steam: Option<SteamId>,
    pub primary_eos: Option<EosId>,
    pub all_steam_ids: Vec<SteamId>,
    pub all_eos_ids: Vec<EosId>,
    pub all_names: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Distinct join days across the whole class
    pub total_sessions: u64,
    pub identity_status: IdentityStatus,
}

impl Identity {
    fn from_record(record: PlayerIdentityRecord, status: IdentityStatus) -> Self {
        Self {
            canonical_id: record.canonical_id,
            primary_steam: record.primary_steam,
            primary_eos: record.primary_eos,
            all_steam_ids: record.all_steam_ids,
            all_eos_ids: record.all_eos_ids,
            all_names: record.all_names,
            first_seen: record.first_seen,
            last_seen: record.last_seen,
            total_sessions: record.total_sessions,
            identity_status: status,
        }
    }
}

/// Combat statistics aggregated over an entire identity class.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerStats {
    pub canonical_id: String,
    pub kills: u64,
    pub deaths: u64,
    pub teamkills: u64,
    pub damage_dealt: f64,
    pub revives: u64,
    pub identity_status: IdentityStatus,
}

/// Resolves Steam/EOS probes to canonical identities and class-wide
/// statistics.
pub struct IdentityResolver {
    store: Arc<dyn ColumnarStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn ColumnarStore>) -> Self {
        Self { store }
    }

    /// Resolves either identifier kind to its canonical identity.
    ///
    /// Reads the materialized table first; on a miss or an upstream failure
    /// it re-runs the union-find inline over raw observations and marks the
    /// answer `pending`. Unknown probes fail with [`IdentityError::Unknown`].
    pub async fn resolve(
        &self,
        kind: IdentifierKind,
        value: &str,
    ) -> Result<Identity, IdentityError> {
        match self.store.identity_by_key(kind, value).await {
            Ok(Some(record)) => {
                return Ok(Identity::from_record(record, IdentityStatus::Resolved))
            }
            Ok(None) => {
                debug!("Identity table miss for {kind:?} {value}, trying pending mode");
            }
            Err(e) => {
                warn!("Identity table unavailable ({e}), falling back to pending mode");
            }
        }

        let probe = parse_probe(kind, value)?;
        let classes = self.pending_classes().await?;
        classes
            .into_iter()
            .find(|record| contains_key(record, &probe))
            .map(|record| Identity::from_record(record, IdentityStatus::Pending))
            .ok_or_else(|| IdentityError::Unknown {
                kind,
                value: value.to_string(),
            })
    }

    /// Statistics over the probe's **entire** identity class.
    ///
    /// The probe is expanded to `all_steam_ids ∪ all_eos_ids` before
    /// counting; filtering by the probe id alone undercounts players whose
    /// records are split across identifiers.
    pub async fn statistics(
        &self,
        kind: IdentifierKind,
        value: &str,
    ) -> Result<PlayerStats, IdentityError> {
        let identity = self.resolve(kind, value).await?;
        let stats: CombatStats = self
            .store
            .combat_stats(&identity.all_steam_ids, &identity.all_eos_ids)
            .await?;
        Ok(PlayerStats {
            canonical_id: identity.canonical_id,
            kills: stats.kills,
            deaths: stats.deaths,
            teamkills: stats.teamkills,
            damage_dealt: stats.damage_dealt,
            revives: stats.revives,
            identity_status: identity.identity_status,
        })
    }

    /// Searches identities by partial name or identifier fragment.
    ///
    /// Returns one row per identity, never one per observation.
    pub async fn search(&self, fragment: &str) -> Result<Vec<Identity>, IdentityError> {
        let needle = fragment.to_lowercase();
        let (records, status) = match self.store.identities().await {
            Ok(records) if !records.is_empty() => (records, IdentityStatus::Resolved),
            Ok(_) => (self.pending_classes().await?, IdentityStatus::Pending),
            Err(e) => {
                warn!("Identity table unavailable ({e}), searching in pending mode");
                (self.pending_classes().await?, IdentityStatus::Pending)
            }
        };

        Ok(records
            .into_iter()
            .filter(|record| {
                record
                    .all_names
                    .iter()
                    .any(|n| n.to_lowercase().contains(&needle))
                    || record
                        .all_steam_ids
                        .iter()
                        .any(|s| s.to_string().contains(&needle))
                    || record
                        .all_eos_ids
                        .iter()
                        .any(|e| e.as_str().to_lowercase().contains(&needle))
            })
            .map(|record| Identity::from_record(record, status))
            .collect())
    }

    /// Recomputes every identity class from raw observations and replaces
    /// the materialized tables. Returns the class count.
    pub async fn rebuild(&self) -> Result<usize, IdentityError> {
        let classes = self.pending_classes().await?;
        self.store.replace_identities(&classes).await?;
        info!("Rebuilt {} player identities", classes.len());
        Ok(classes.len())
    }

    /// Runs the union-find inline over all raw observations.
    async fn pending_classes(&self) -> Result<Vec<PlayerIdentityRecord>, IdentityError> {
        let observations = self.store.observations().await?;
        Ok(build_classes(&observations))
    }
}

fn parse_probe(kind: IdentifierKind, value: &str) -> Result<IdentityKey, IdentityError> {
    match kind {
        IdentifierKind::Steam => value
            .parse::<SteamId>()
            .map(IdentityKey::Steam)
            .map_err(|_| IdentityError::MalformedProbe(value.to_string())),
        IdentifierKind::Eos => EosId::new(value)
            .map(IdentityKey::Eos)
            .map_err(|_| IdentityError::MalformedProbe(value.to_string())),
    }
}

fn contains_key(record: &PlayerIdentityRecord, key: &IdentityKey) -> bool {
    match key {
        IdentityKey::Steam(id) => record.all_steam_ids.contains(id),
        IdentityKey::Eos(id) => record.all_eos_ids.contains(id),
    }
}

/// Computes identity classes from flattened observations.
///
/// Canonical id is the lexicographic minimum of member key strings, so a
/// rebuild is deterministic for a given record set regardless of input
/// order.
pub fn build_classes(observations: &[Observation]) -> Vec<PlayerIdentityRecord> {
    let mut uf = UnionFind::new();
    // Per-key recency bookkeeping for primary-id selection.
    let mut last_seen_at: HashMap<IdentityKey, DateTime<Utc>> = HashMap::new();

    for observation in observations {
        let steam_key = observation.steam_id.map(IdentityKey::Steam);
        let eos_key = observation.eos_id.clone().map(IdentityKey::Eos);

        let steam_slot = steam_key.clone().map(|k| uf.insert(k));
        let eos_slot = eos_key.clone().map(|k| uf.insert(k));
        if let (Some(a), Some(b)) = (steam_slot, eos_slot) {
            uf.union(a, b);
        }

        for key in [steam_key, eos_key].into_iter().flatten() {
            let entry = last_seen_at.entry(key).or_insert(observation.event_time);
            if observation.event_time > *entry {
                *entry = observation.event_time;
            }
        }
    }

    let classes = uf.classes();
    let mut records = Vec::with_capacity(classes.len());

    for class in classes {
        let canonical_id = class
            .iter()
            .map(IdentityKey::as_string)
            .min()
            .unwrap_or_default();

        let member_steam: Vec<SteamId> = class
            .iter()
            .filter_map(|k| match k {
                IdentityKey::Steam(id) => Some(*id),
                IdentityKey::Eos(_) => None,
            })
            .collect();
        let member_eos: Vec<EosId> = class
            .iter()
            .filter_map(|k| match k {
                IdentityKey::Eos(id) => Some(id.clone()),
                IdentityKey::Steam(_) => None,
            })
            .collect();

        let in_class = |observation: &Observation| -> bool {
            observation
                .steam_id
                .map(|s| member_steam.contains(&s))
                .unwrap_or(false)
                || observation
                    .eos_id
                    .as_ref()
                    .map(|e| member_eos.contains(e))
                    .unwrap_or(false)
        };

        let mut first_seen: Option<DateTime<Utc>> = None;
        let mut last_seen: Option<DateTime<Utc>> = None;
        let mut names: Vec<String> = Vec::new();
        let mut join_days: BTreeSet<chrono::NaiveDate> = BTreeSet::new();

        for observation in observations.iter().filter(|o| in_class(o)) {
            first_seen = Some(match first_seen {
                Some(t) => t.min(observation.event_time),
                None => observation.event_time,
            });
            last_seen = Some(match last_seen {
                Some(t) => t.max(observation.event_time),
                None => observation.event_time,
            });
            if let Some(name) = &observation.name {
                if !name.is_empty() && !names.contains(name) {
                    names.push(name.clone());
                }
            }
            if observation.role == ObservationRole::Join {
                join_days.insert(observation.event_time.date_naive());
            }
        }

        let most_recent = |keys: &[IdentityKey]| -> Option<IdentityKey> {
            keys.iter()
                .max_by_key(|k| last_seen_at.get(k).copied().unwrap_or_default())
                .cloned()
        };
        let steam_keys: Vec<IdentityKey> =
            member_steam.iter().map(|s| IdentityKey::Steam(*s)).collect();
        let eos_keys: Vec<IdentityKey> =
            member_eos.iter().map(|e| IdentityKey::Eos(e.clone())).collect();

        let primary_steam = most_recent(&steam_keys).and_then(|k| match k {
            IdentityKey::Steam(id) => Some(id),
            IdentityKey::Eos(_) => None,
        });
        let primary_eos = most_recent(&eos_keys).and_then(|k| match k {
            IdentityKey::Eos(id) => Some(id),
            IdentityKey::Steam(_) => None,
        });

        let now = Utc::now();
        records.push(PlayerIdentityRecord {
            canonical_id,
            primary_steam,
            primary_eos,
            all_steam_ids: member_steam,
            all_eos_ids: member_eos,
            all_names: names,
            first_seen: first_seen.unwrap_or(now),
            last_seen: last_seen.unwrap_or(now),
            total_sessions: join_days.len() as u64,
        });
    }

    records
}
