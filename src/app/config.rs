use crate::app::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSeed {
    pub station_id: String,
    pub total_chargers: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub http_bind: String,
    pub station_seed: Vec<StationSeed>,
    pub audit_on_startup: bool,
    pub reconcile_repair: bool,
    pub cors_allow_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        // A missing .env file is normal in production.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            db_path: non_empty(&lookup, "DB_PATH")
                .unwrap_or_else(|| "/var/lib/station-sessions/sessions.db".to_string()),
            http_bind: non_empty(&lookup, "HTTP_BIND")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            station_seed: match non_empty(&lookup, "STATION_SEED") {
                Some(raw) => parse_station_seed(&raw)?,
                None => Vec::new(),
            },
            audit_on_startup: parse_bool_or_default(&lookup, "AUDIT_ON_STARTUP", true)?,
            reconcile_repair: parse_bool_or_default(&lookup, "RECONCILE_REPAIR", false)?,
            cors_allow_origin: non_empty(&lookup, "CORS_ALLOW_ORIGIN"),
        })
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool_or_default<F>(lookup: &F, key: &str, default: bool) -> Result<bool, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::config(format!("{key} must be a boolean"))),
        },
        None => Ok(default),
    }
}

/// Parses `station-a:2,station-b:4`.
pub fn parse_station_seed(raw: &str) -> Result<Vec<StationSeed>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (station_id, total) = entry.rsplit_once(':').ok_or_else(|| {
                AppError::config(format!("STATION_SEED entry '{entry}' must be id:chargers"))
            })?;
            let station_id = station_id.trim();
            if station_id.is_empty() {
                return Err(AppError::config(format!(
                    "STATION_SEED entry '{entry}' has an empty station id"
                )));
            }
            let total_chargers = total
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or_else(|| {
                    AppError::config(format!(
                        "STATION_SEED entry '{entry}' must have a positive charger count"
                    ))
                })?;

            Ok(StationSeed {
                station_id: station_id.to_string(),
                total_chargers,
            })
        })
        .collect()
}
