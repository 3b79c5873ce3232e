//! Statement catalog
//!
//! Every statement the service runs against storage lives here. Writes are
//! [`Command`]s; reads are [`Query`]s that carry the decoder for their own
//! result rows, so column order and types are fixed next to the SQL.

use rusqlite::Row;

use crate::models::{Location, ReadingPoint, SiteCoordinates, TokenRecord};

/// A data-mutating statement
#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub name: &'static str,
    pub sql: &'static str,
}

/// A read-only statement and the decoder for its rows
pub struct Query<T> {
    pub name: &'static str,
    pub sql: &'static str,
    pub decode: fn(&Row<'_>) -> rusqlite::Result<T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Query<T> {}

impl<T> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("name", &self.name)
            .field("sql", &self.sql)
            .finish()
    }
}

// Schema

pub const CREATE_SCHEMA: &str = r#"
    -- Accounts
    CREATE TABLE IF NOT EXISTS auth (
        username TEXT PRIMARY KEY CHECK (username <> ''),
        hash TEXT NOT NULL
    );

    -- Session tokens; expiration 0 marks a token as spent
    CREATE TABLE IF NOT EXISTS tokens (
        username TEXT NOT NULL REFERENCES auth (username),
        token TEXT NOT NULL UNIQUE,
        expiration INTEGER NOT NULL
    );

    -- Uploaded sensor readings
    CREATE TABLE IF NOT EXISTS readings (
        username TEXT NOT NULL REFERENCES auth (username),
        sensor TEXT NOT NULL,
        timestamp REAL NOT NULL,
        value REAL NOT NULL,
        PRIMARY KEY (username, sensor, timestamp)
    );

    -- Places to fetch weather for
    CREATE TABLE IF NOT EXISTS location (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL REFERENCES auth (username),
        place_name TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        UNIQUE (username, place_name)
    );

    -- Latest weather observations per location
    CREATE TABLE IF NOT EXISTS weather (
        location_id INTEGER NOT NULL REFERENCES location (id),
        timestamp INTEGER NOT NULL,
        sun_up INTEGER NOT NULL,
        temperature REAL,
        apparent_temperature REAL,
        cloud_cover REAL,
        humidity REAL,
        pressure REAL,
        precip_probability REAL,
        PRIMARY KEY (location_id, timestamp)
    );
"#;

pub const CREATE_INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_tokens_expiration ON tokens (expiration);
    CREATE INDEX IF NOT EXISTS idx_readings_user_time ON readings (username, timestamp);
"#;

// Auth

pub const GET_HASH: Query<String> = Query {
    name: "get_hash",
    sql: "SELECT hash FROM auth WHERE username = ?1",
    decode: |row| row.get(0),
};

pub const ADD_USER: Command = Command {
    name: "add_user",
    sql: "INSERT INTO auth (username, hash) VALUES (?1, ?2)",
};

pub const ADD_TOKEN: Command = Command {
    name: "add_token",
    sql: "INSERT INTO tokens (username, token, expiration) VALUES (?1, ?2, ?3)",
};

pub const GET_USER_BY_TOKEN: Query<TokenRecord> = Query {
    name: "get_user_by_token",
    sql: "SELECT username, expiration FROM tokens WHERE token = ?1",
    decode: |row| {
        Ok(TokenRecord {
            username: row.get(0)?,
            expiration: row.get(1)?,
        })
    },
};

pub const EXPIRE_TOKEN: Command = Command {
    name: "expire_token",
    sql: "UPDATE tokens SET expiration = 0 WHERE token = ?1",
};

/// Spend a token only if it is still live at ?2; affects zero rows otherwise
pub const CLAIM_TOKEN: Command = Command {
    name: "claim_token",
    sql: "UPDATE tokens SET expiration = 0 WHERE token = ?1 AND expiration >= ?2",
};

pub const PURGE_TOKENS: Command = Command {
    name: "purge_tokens",
    sql: "DELETE FROM tokens WHERE expiration < ?1",
};

// Readings

/// Duplicate (username, sensor, timestamp) keys keep the first value
pub const ADD_READING: Command = Command {
    name: "add_reading",
    sql: "INSERT OR IGNORE INTO readings (username, sensor, timestamp, value)
          VALUES (?1, ?2, ?3, ?4)",
};

pub const GET_READINGS: Query<ReadingPoint> = Query {
    name: "get_readings",
    sql: "SELECT timestamp, value FROM readings
          WHERE username = ?1 AND sensor = ?2 AND timestamp >= ?3 AND timestamp <= ?4
          ORDER BY timestamp",
    decode: |row| {
        Ok(ReadingPoint {
            timestamp: row.get(0)?,
            value: row.get(1)?,
        })
    },
};

pub const GET_SENSORS: Query<String> = Query {
    name: "get_sensors",
    sql: "SELECT DISTINCT sensor FROM readings
          WHERE username = ?1 AND timestamp >= ?2 AND timestamp <= ?3
          ORDER BY sensor",
    decode: |row| row.get(0),
};

// Locations and weather

pub const GET_LOCATION: Query<Location> = Query {
    name: "get_location",
    sql: "SELECT id, username, place_name, latitude, longitude FROM location
          WHERE username = ?1 AND place_name = ?2",
    decode: |row| {
        Ok(Location {
            id: row.get(0)?,
            username: row.get(1)?,
            place_name: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
        })
    },
};

pub const ADD_LOCATION: Command = Command {
    name: "add_location",
    sql: "INSERT INTO location (username, place_name, latitude, longitude)
          VALUES (?1, ?2, ?3, ?4)",
};

pub const GET_COORDINATES: Query<SiteCoordinates> = Query {
    name: "get_coordinates",
    sql: "SELECT id, latitude, longitude FROM location ORDER BY id",
    decode: |row| {
        Ok(SiteCoordinates {
            location_id: row.get(0)?,
            latitude: row.get(1)?,
            longitude: row.get(2)?,
        })
    },
};

/// A second sample for the same (location_id, timestamp) replaces the first
pub const ADD_WEATHER_SAMPLE: Command = Command {
    name: "add_weather_sample",
    sql: "INSERT OR REPLACE INTO weather (
              location_id, timestamp, sun_up, temperature, apparent_temperature,
              cloud_cover, humidity, pressure, precip_probability
          ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
};
