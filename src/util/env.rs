//! Process configuration, read once from the environment (plus `.env` via
//! [`dotenvy`]) and cached for the lifetime of the process.

use std::sync::LazyLock;

use serde::Deserialize;
use serde::de::value::MapDeserializer;
use thiserror::Error;
use tokio::sync::OnceCell;

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);

pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = ENV_VARS.get_or_try_init(|| async { Env::new() }).await?;
    Ok(match var {
        Var::DatabaseUrl => &vars.database_url,
        Var::ServerApiPort => &vars.server_api_port,
        Var::CorsAllowOrigins => &vars.cors_allow_origins,
    })
}

/// Every variable is optional: an unset `DATABASE_URL` selects the in-memory
/// store, the rest fall back to serve-anywhere defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_port")]
    pub server_api_port: String,
    #[serde(default = "default_cors")]
    pub cors_allow_origins: String,
}

fn default_port() -> String {
    "8080".to_string()
}

fn default_cors() -> String {
    "*".to_string()
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        // a missing .env file is fine; a malformed one is not
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(EnvErr::Dotenvy(e));
            }
        }

        Ok(from_env::<Env>()?)
    }
}

#[derive(Debug)]
pub enum Var {
    DatabaseUrl,
    ServerApiPort,
    CorsAllowOrigins,
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

pub fn from_env<T>() -> Result<T, EnvDeserializeError>
where
    T: serde::de::DeserializeOwned,
{
    from_iter(dotenvy::vars())
}

pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: serde::de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    let deserializer: MapDeserializer<'_, _, serde::de::value::Error> =
        MapDeserializer::new(iter.into_iter());
    T::deserialize(deserializer).map_err(|e| EnvDeserializeError::Custom(e.to_string()))
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),
}
