//! Runtime configuration, read from environment variables. A `.env` file in
//! the working directory (or a parent) is loaded first; variables already set
//! in the process environment win over the file.
//!
//! | variable                | default        |
//! |-------------------------|----------------|
//! | `BIND_ADDR`             | `0.0.0.0:2052` |
//! | `MAX_ROOMS`             | `50`           |
//! | `CLIENT_QUEUE_CAPACITY` | `10`           |
//! | `BROADCAST_CAPACITY`    | `5`            |
//! | `HISTORY_LIMIT`         | `100`          |
//! | `HISTORY_BUFFER`        | `100`          |
//! | `PIPELINE_CONCURRENCY`  | `64`           |
//! | `PIPELINE_BACKLOG`      | `1024`         |
//! | `ROOM_TTL_SECS`         | `86400`        |
//! | `CLEANUP_INTERVAL_SECS` | `300`          |
//! | `STATIC_DIR`            | `public`       |
//! | `TLS_CERT_PATH`         | unset          |
//! | `TLS_KEY_PATH`          | unset          |

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_rooms: usize,
    pub client_queue_capacity: usize,
    pub broadcast_capacity: usize,
    pub history_limit: usize,
    pub history_buffer: usize,
    pub pipeline_concurrency: usize,
    pub pipeline_backlog: usize,
    pub room_ttl: Duration,
    pub cleanup_interval: Duration,
    pub static_dir: PathBuf,
    pub tls: Option<TlsPaths>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 2052)),
            max_rooms: 50,
            client_queue_capacity: 10,
            broadcast_capacity: 5,
            history_limit: 100,
            history_buffer: 100,
            pipeline_concurrency: 64,
            pipeline_backlog: 1024,
            room_ttl: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            static_dir: PathBuf::from("public"),
            tls: None,
        }
    }
}

/// Loads the nearest `.env` file into the process environment and returns its
/// path. Call before anything reads the environment.
pub fn load_env_file() -> Result<PathBuf, dotenv::Error> {
    dotenv::dotenv()
}

pub fn load_env_file_from(path: &Path) -> Result<(), dotenv::Error> {
    dotenv::from_path(path)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let config = Config {
            bind_addr: parse(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            max_rooms: positive(&lookup, "MAX_ROOMS", defaults.max_rooms)?,
            client_queue_capacity: positive(
                &lookup,
                "CLIENT_QUEUE_CAPACITY",
                defaults.client_queue_capacity,
            )?,
            broadcast_capacity: positive(&lookup, "BROADCAST_CAPACITY", defaults.broadcast_capacity)?,
            history_limit: parse(&lookup, "HISTORY_LIMIT", defaults.history_limit)?,
            history_buffer: parse(&lookup, "HISTORY_BUFFER", defaults.history_buffer)?,
            pipeline_concurrency: positive(
                &lookup,
                "PIPELINE_CONCURRENCY",
                defaults.pipeline_concurrency,
            )?,
            pipeline_backlog: positive(&lookup, "PIPELINE_BACKLOG", defaults.pipeline_backlog)?,
            room_ttl: Duration::from_secs(positive(
                &lookup,
                "ROOM_TTL_SECS",
                defaults.room_ttl.as_secs(),
            )?),
            cleanup_interval: Duration::from_secs(positive(
                &lookup,
                "CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval.as_secs(),
            )?),
            static_dir: lookup("STATIC_DIR").map_or(defaults.static_dir, PathBuf::from),
            tls: match (lookup("TLS_CERT_PATH"), lookup("TLS_KEY_PATH")) {
                (Some(cert), Some(key)) => Some(TlsPaths {
                    cert: cert.into(),
                    key: key.into(),
                }),
                (None, None) => None,
                _ => return Err(ConfigError::IncompleteTls),
            },
        };

        Ok(config)
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn positive<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
{
    let value = parse(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Zero(key));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("MAX_ROOMS", "3"),
            ("CLIENT_QUEUE_CAPACITY", " 32 "),
            ("HISTORY_LIMIT", "0"),
            ("ROOM_TTL_SECS", "60"),
            ("TLS_CERT_PATH", "cert.pem"),
            ("TLS_KEY_PATH", "key.pem"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_rooms, 3);
        assert_eq!(config.client_queue_capacity, 32);
        assert_eq!(config.history_limit, 0);
        assert_eq!(config.room_ttl, Duration::from_secs(60));
        assert_eq!(config.tls.unwrap().key, PathBuf::from("key.pem"));
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            Config::from_lookup(lookup(&[("MAX_ROOMS", "lots")])),
            Err(ConfigError::Invalid {
                key: "MAX_ROOMS",
                value: "lots".to_string()
            })
        );
        assert_eq!(
            Config::from_lookup(lookup(&[("CLIENT_QUEUE_CAPACITY", "0")])),
            Err(ConfigError::Zero("CLIENT_QUEUE_CAPACITY"))
        );
        assert_eq!(
            Config::from_lookup(lookup(&[("TLS_CERT_PATH", "cert.pem")])),
            Err(ConfigError::IncompleteTls)
        );
    }

    #[test]
    fn env_file_fills_unset_variables_only() {
        let path = std::env::temp_dir().join(format!("room_hub-{}.env", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "ROOM_HUB_TEST_MAX_ROOMS=7\nROOM_HUB_TEST_STATIC_DIR=from-file\n",
        )
        .unwrap();
        std::env::set_var("ROOM_HUB_TEST_STATIC_DIR", "from-process");

        load_env_file_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(std::env::var("ROOM_HUB_TEST_MAX_ROOMS").unwrap(), "7");
        assert_eq!(std::env::var("ROOM_HUB_TEST_STATIC_DIR").unwrap(), "from-process");
    }

    #[test]
    fn missing_env_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("room_hub-missing-{}.env", uuid::Uuid::new_v4()));
        assert!(load_env_file_from(&path).is_err());
    }
}
