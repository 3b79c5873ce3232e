//! Knowledge base facade
//!
//! Typed API over the storage actor. This is the only interface request
//! handlers and background jobs use. Storage faults stop here: every call
//! logs the fault and reports it as `false`, `None` or an empty result.

use std::collections::BTreeSet;

use tracing::{debug, error, info, instrument, warn};

use crate::config::StorageConfig;
use crate::error::Result;
use crate::models::{Location, ReadingPoint, SiteCoordinates, TokenRecord, WeatherSample};
use crate::storage::{catalog, StorageActor, Value};

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

/// Collapse a write result into success/failure, logging the fault
fn succeeded(statement: &str, result: Result<usize>) -> bool {
    match result {
        Ok(rows) => {
            debug!(statement, rows, "Statement executed");
            true
        }
        Err(e) => {
            warn!(statement, error = %e, "Statement failed");
            false
        }
    }
}

/// Expect at most one row; more than one means a key invariant is broken
fn single<T>(statement: &str, result: Result<Vec<T>>) -> Option<T> {
    match result {
        Ok(mut rows) => match rows.len() {
            0 => None,
            1 => rows.pop(),
            n => {
                error!(statement, rows = n, "Expected at most one row, schema inconsistent");
                None
            }
        },
        Err(e) => {
            warn!(statement, error = %e, "Query failed");
            None
        }
    }
}

fn all<T>(statement: &str, result: Result<Vec<T>>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!(statement, error = %e, "Query failed");
        Vec::new()
    })
}

/// Typed storage operations
#[derive(Clone)]
pub struct KnowledgeBase {
    storage: StorageActor,
}

impl KnowledgeBase {
    pub fn new(storage: StorageActor) -> Self {
        Self { storage }
    }

    /// Open storage and wrap it
    pub fn open(config: &StorageConfig) -> Result<Self> {
        Ok(Self::new(StorageActor::open(config)?))
    }

    /// Open an in-memory knowledge base (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(StorageActor::open_in_memory()?))
    }

    pub fn storage(&self) -> &StorageActor {
        &self.storage
    }

    // Auth

    /// Stored password hash for `username`
    #[instrument(skip(self))]
    pub async fn get_hash(&self, username: &str) -> Option<String> {
        let rows = self
            .storage
            .fetch(catalog::GET_HASH, vec![text(username)])
            .await;
        single(catalog::GET_HASH.name, rows)
    }

    /// Register a user. Fails for an empty name or an existing user.
    #[instrument(skip(self, hash))]
    pub async fn add_user(&self, username: &str, hash: &str) -> bool {
        if username.is_empty() {
            warn!("Refusing to add user with empty name");
            return false;
        }
        let result = self
            .storage
            .execute(catalog::ADD_USER, vec![text(username), text(hash)])
            .await;
        succeeded(catalog::ADD_USER.name, result)
    }

    #[instrument(skip(self, token))]
    pub async fn add_token(&self, username: &str, token: &str, expiration: i64) -> bool {
        let result = self
            .storage
            .execute(
                catalog::ADD_TOKEN,
                vec![text(username), text(token), Value::Integer(expiration)],
            )
            .await;
        succeeded(catalog::ADD_TOKEN.name, result)
    }

    /// Owner and expiry of `token`
    #[instrument(skip_all)]
    pub async fn get_user(&self, token: &str) -> Option<TokenRecord> {
        let rows = self
            .storage
            .fetch(catalog::GET_USER_BY_TOKEN, vec![text(token)])
            .await;
        single(catalog::GET_USER_BY_TOKEN.name, rows)
    }

    /// Mark `token` as spent. The row stays until the next purge.
    #[instrument(skip_all)]
    pub async fn expire_token(&self, token: &str) -> bool {
        let result = self
            .storage
            .execute(catalog::EXPIRE_TOKEN, vec![text(token)])
            .await;
        succeeded(catalog::EXPIRE_TOKEN.name, result)
    }

    /// Spend `token` if it is still live at `now`. Returns true only for the
    /// one caller that moved it from live to spent.
    #[instrument(skip(self, token))]
    pub async fn claim_token(&self, token: &str, now: i64) -> bool {
        match self
            .storage
            .execute(catalog::CLAIM_TOKEN, vec![text(token), Value::Integer(now)])
            .await
        {
            Ok(1) => true,
            Ok(rows) => {
                debug!(rows, "Token already spent");
                false
            }
            Err(e) => {
                warn!(error = %e, "Token claim failed");
                false
            }
        }
    }

    /// Delete every token whose expiration is strictly before `now`
    #[instrument(skip(self))]
    pub async fn purge_tokens(&self, now: i64) -> bool {
        match self
            .storage
            .execute(catalog::PURGE_TOKENS, vec![Value::Integer(now)])
            .await
        {
            Ok(purged) => {
                info!(purged, "Purged expired tokens");
                true
            }
            Err(e) => {
                warn!(error = %e, "Token purge failed");
                false
            }
        }
    }

    // Readings

    /// Store a reading. An existing reading at the same key is kept and the
    /// call still succeeds.
    #[instrument(skip(self))]
    pub async fn add_reading(
        &self,
        username: &str,
        sensor: &str,
        timestamp: f64,
        value: f64,
    ) -> bool {
        let result = self
            .storage
            .execute(
                catalog::ADD_READING,
                vec![
                    text(username),
                    text(sensor),
                    Value::Real(timestamp),
                    Value::Real(value),
                ],
            )
            .await;
        succeeded(catalog::ADD_READING.name, result)
    }

    /// Readings with `start <= timestamp <= end`, ordered by timestamp
    #[instrument(skip(self))]
    pub async fn get_readings(
        &self,
        username: &str,
        sensor: &str,
        start: f64,
        end: f64,
    ) -> Vec<ReadingPoint> {
        let rows = self
            .storage
            .fetch(
                catalog::GET_READINGS,
                vec![
                    text(username),
                    text(sensor),
                    Value::Real(start),
                    Value::Real(end),
                ],
            )
            .await;
        all(catalog::GET_READINGS.name, rows)
    }

    /// Sensors with at least one reading in `[start, end]`
    #[instrument(skip(self))]
    pub async fn get_sensors(&self, username: &str, start: f64, end: f64) -> BTreeSet<String> {
        let rows = self
            .storage
            .fetch(
                catalog::GET_SENSORS,
                vec![text(username), Value::Real(start), Value::Real(end)],
            )
            .await;
        all(catalog::GET_SENSORS.name, rows).into_iter().collect()
    }

    // Locations and weather

    #[instrument(skip(self))]
    pub async fn get_location(&self, username: &str, place_name: &str) -> Option<Location> {
        let rows = self
            .storage
            .fetch(catalog::GET_LOCATION, vec![text(username), text(place_name)])
            .await;
        single(catalog::GET_LOCATION.name, rows)
    }

    #[instrument(skip(self))]
    pub async fn add_location(
        &self,
        username: &str,
        place_name: &str,
        latitude: f64,
        longitude: f64,
    ) -> bool {
        let result = self
            .storage
            .execute(
                catalog::ADD_LOCATION,
                vec![
                    text(username),
                    text(place_name),
                    Value::Real(latitude),
                    Value::Real(longitude),
                ],
            )
            .await;
        succeeded(catalog::ADD_LOCATION.name, result)
    }

    /// Coordinates of every location; `None` when there are none
    #[instrument(skip(self))]
    pub async fn get_coordinates(&self) -> Option<Vec<SiteCoordinates>> {
        let rows = self.storage.fetch(catalog::GET_COORDINATES, vec![]).await;
        let coords = all(catalog::GET_COORDINATES.name, rows);
        if coords.is_empty() {
            None
        } else {
            Some(coords)
        }
    }

    /// Insert a sample, replacing any sample with the same location and timestamp
    #[instrument(
        skip(self, sample),
        fields(location_id = sample.location_id, timestamp = sample.timestamp)
    )]
    pub async fn add_weather_sample(&self, sample: &WeatherSample) -> bool {
        let result = self
            .storage
            .execute(
                catalog::ADD_WEATHER_SAMPLE,
                vec![
                    Value::Integer(sample.location_id),
                    Value::Integer(sample.timestamp),
                    Value::Integer(i64::from(sample.sun_up)),
                    Value::Real(sample.temperature),
                    Value::Real(sample.apparent_temperature),
                    Value::Real(sample.cloud_cover),
                    Value::Real(sample.humidity),
                    Value::Real(sample.pressure),
                    Value::Real(sample.precip_probability),
                ],
            )
            .await;
        succeeded(catalog::ADD_WEATHER_SAMPLE.name, result)
    }

    /// Stop the storage worker; later calls fail
    pub fn stop(&self) {
        self.storage.stop();
    }

    /// Stop the storage worker and wait for the connection to close
    pub async fn shutdown(&self) {
        self.storage.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Query;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_single_row_helper() {
        assert_eq!(single::<i64>("x", Ok(vec![])), None);
        assert_eq!(single("x", Ok(vec![7])), Some(7));
        // More than one row means a broken key; treat as not found
        assert_eq!(single("x", Ok(vec![1, 2])), None);
        assert_eq!(single::<i64>("x", Err(crate::error::Error::StorageClosed)), None);
    }

    #[test]
    fn test_write_and_list_helpers() {
        assert!(succeeded("x", Ok(0)));
        assert!(!succeeded("x", Err(crate::error::Error::StorageClosed)));
        assert_eq!(all("x", Ok(vec![1, 2])), vec![1, 2]);
        assert!(all::<i64>("x", Err(crate::error::Error::StorageClosed)).is_empty());
    }

    async fn kb_with_users(users: &[&str]) -> KnowledgeBase {
        let kb = KnowledgeBase::open_in_memory().unwrap();
        for user in users {
            assert!(kb.add_user(user, "hash").await);
        }
        kb
    }

    fn sample(location_id: i64, timestamp: i64, temperature: f64) -> WeatherSample {
        WeatherSample {
            location_id,
            timestamp,
            sun_up: true,
            temperature,
            apparent_temperature: temperature,
            cloud_cover: 0.5,
            humidity: 0.4,
            pressure: 1013.0,
            precip_probability: 0.1,
        }
    }

    #[tokio::test]
    async fn test_add_user_and_get_hash() {
        let kb = KnowledgeBase::open_in_memory().unwrap();
        assert!(kb.add_user("alice", "$argon2id$fake").await);
        assert_eq!(kb.get_hash("alice").await.as_deref(), Some("$argon2id$fake"));
        assert_eq!(kb.get_hash("bob").await, None);
    }

    #[tokio::test]
    async fn test_duplicate_user_fails() {
        let kb = kb_with_users(&["alice"]).await;
        assert!(!kb.add_user("alice", "other").await);
        // First hash is untouched
        assert_eq!(kb.get_hash("alice").await.as_deref(), Some("hash"));
    }

    #[tokio::test]
    async fn test_empty_username_rejected() {
        let kb = KnowledgeBase::open_in_memory().unwrap();
        assert!(!kb.add_user("", "hash").await);
    }

    #[tokio::test]
    async fn test_token_lookup_and_expire() {
        let kb = kb_with_users(&["alice"]).await;
        assert!(kb.add_token("alice", "t1", 5000).await);

        let record = kb.get_user("t1").await.unwrap();
        assert_eq!(record.username, "alice");
        assert_eq!(record.expiration, 5000);

        assert!(kb.expire_token("t1").await);
        let record = kb.get_user("t1").await.unwrap();
        assert_eq!(record.expiration, 0);

        assert!(kb.get_user("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_claim_token_succeeds_once() {
        let kb = kb_with_users(&["alice"]).await;
        assert!(kb.add_token("alice", "live", 5000).await);
        assert!(kb.add_token("alice", "stale", 100).await);

        assert!(kb.claim_token("live", 1000).await);
        assert!(!kb.claim_token("live", 1000).await);
        assert!(!kb.claim_token("stale", 1000).await);
        assert!(!kb.claim_token("missing", 1000).await);
        assert_eq!(kb.get_user("stale").await.unwrap().expiration, 100);
    }

    #[tokio::test]
    async fn test_token_for_unknown_user_fails() {
        let kb = KnowledgeBase::open_in_memory().unwrap();
        assert!(!kb.add_token("ghost", "t1", 5000).await);
    }

    #[tokio::test]
    async fn test_duplicate_token_fails() {
        let kb = kb_with_users(&["alice", "bob"]).await;
        assert!(kb.add_token("alice", "same", 5000).await);
        assert!(!kb.add_token("bob", "same", 6000).await);
        assert_eq!(kb.get_user("same").await.unwrap().username, "alice");
    }

    #[tokio::test]
    async fn test_purge_removes_only_past_tokens() {
        let kb = kb_with_users(&["alice"]).await;
        let now = 1_000_000i64;
        let mut rng = StdRng::seed_from_u64(7);

        let mut expirations = Vec::new();
        for i in 0..60 {
            let expiration = match i % 4 {
                0 => now,
                1 => 0,
                _ => now + rng.gen_range(-500..500),
            };
            let token = format!("token-{}", i);
            assert!(kb.add_token("alice", &token, expiration).await);
            expirations.push((token, expiration));
        }

        assert!(kb.purge_tokens(now).await);

        for (token, expiration) in expirations {
            let found = kb.get_user(&token).await;
            if expiration < now {
                assert!(found.is_none(), "{} should be purged", token);
            } else {
                assert_eq!(found.unwrap().expiration, expiration);
            }
        }
    }

    #[tokio::test]
    async fn test_duplicate_reading_keeps_first_value() {
        let kb = kb_with_users(&["alice"]).await;

        assert!(kb.add_reading("alice", "therm", 100.0, 21.5).await);
        assert!(kb.add_reading("alice", "therm", 100.0, 99.9).await);

        let readings = kb.get_readings("alice", "therm", 0.0, 200.0).await;
        assert_eq!(
            readings,
            vec![ReadingPoint {
                timestamp: 100.0,
                value: 21.5
            }]
        );
    }

    #[tokio::test]
    async fn test_reading_for_unknown_user_fails() {
        let kb = KnowledgeBase::open_in_memory().unwrap();
        assert!(!kb.add_reading("ghost", "therm", 1.0, 1.0).await);
    }

    #[tokio::test]
    async fn test_range_query_is_inclusive() {
        let kb = kb_with_users(&["alice"]).await;
        let mut rng = StdRng::seed_from_u64(42);

        let mut timestamps = BTreeSet::new();
        while timestamps.len() < 80 {
            timestamps.insert(rng.gen_range(0u32..1000));
        }
        let (start, end) = (250.0, 750.0);
        timestamps.insert(250);
        timestamps.insert(750);

        for ts in &timestamps {
            let ts = f64::from(*ts);
            assert!(kb.add_reading("alice", "therm", ts, ts * 2.0).await);
        }
        // Other sensors and users are not included
        assert!(kb.add_reading("alice", "hygro", 500.0, 1.0).await);

        let readings = kb.get_readings("alice", "therm", start, end).await;
        let expected: Vec<ReadingPoint> = timestamps
            .iter()
            .map(|ts| f64::from(*ts))
            .filter(|ts| (start..=end).contains(ts))
            .map(|ts| ReadingPoint {
                timestamp: ts,
                value: ts * 2.0,
            })
            .collect();
        assert_eq!(readings, expected);
    }

    #[tokio::test]
    async fn test_get_sensors_in_range() {
        let kb = kb_with_users(&["alice", "bob"]).await;
        assert!(kb.add_reading("alice", "therm", 10.0, 1.0).await);
        assert!(kb.add_reading("alice", "therm", 20.0, 1.0).await);
        assert!(kb.add_reading("alice", "hygro", 30.0, 1.0).await);
        assert!(kb.add_reading("alice", "baro", 300.0, 1.0).await);
        assert!(kb.add_reading("bob", "wind", 15.0, 1.0).await);

        let sensors = kb.get_sensors("alice", 0.0, 30.0).await;
        let expected: BTreeSet<String> = ["hygro", "therm"].iter().map(|s| s.to_string()).collect();
        assert_eq!(sensors, expected);

        assert!(kb.get_sensors("alice", 1000.0, 2000.0).await.is_empty());
    }

    #[tokio::test]
    async fn test_locations_and_coordinates() {
        let kb = kb_with_users(&["alice"]).await;
        assert!(kb.get_coordinates().await.is_none());

        assert!(kb.add_location("alice", "home", 52.52, 13.40).await);
        assert!(kb.add_location("alice", "cabin", 61.5, 23.7).await);
        assert!(!kb.add_location("alice", "home", 0.0, 0.0).await);

        let home = kb.get_location("alice", "home").await.unwrap();
        assert_eq!(home.latitude, 52.52);
        assert_eq!(home.longitude, 13.40);

        let coords = kb.get_coordinates().await.unwrap();
        assert_eq!(coords.len(), 2);
        assert!(coords
            .iter()
            .any(|c| c.location_id == home.id && c.latitude == 52.52));
    }

    #[tokio::test]
    async fn test_weather_sample_replaces_on_conflict() {
        const TEMPERATURES: Query<f64> = Query {
            name: "weather_temperatures",
            sql: "SELECT temperature FROM weather WHERE location_id = ?1 ORDER BY timestamp",
            decode: |row| row.get(0),
        };

        let kb = kb_with_users(&["alice"]).await;
        assert!(kb.add_location("alice", "home", 1.0, 2.0).await);
        let id = kb.get_location("alice", "home").await.unwrap().id;

        assert!(kb.add_weather_sample(&sample(id, 3600, 10.0)).await);
        assert!(kb.add_weather_sample(&sample(id, 3600, 12.5)).await);
        assert!(kb.add_weather_sample(&sample(id, 7200, 14.0)).await);

        let temps = kb
            .storage()
            .fetch(TEMPERATURES, vec![Value::Integer(id)])
            .await
            .unwrap();
        assert_eq!(temps, vec![12.5, 14.0]);
    }

    #[tokio::test]
    async fn test_calls_after_stop_report_failure() {
        let kb = kb_with_users(&["alice"]).await;
        kb.stop();

        assert!(!kb.add_reading("alice", "therm", 1.0, 1.0).await);
        assert!(kb.get_hash("alice").await.is_none());
        assert!(kb.get_readings("alice", "therm", 0.0, 10.0).await.is_empty());
    }
}
