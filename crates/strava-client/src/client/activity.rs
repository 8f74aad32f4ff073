// Detailed activity representation returned by GET /activities/{id}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Owner reference embedded in an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityAthlete {
    pub id: u64,
}

/// A Strava activity.
///
/// Only the fields the relay persists are modeled; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StravaActivity {
    pub id: u64,
    pub athlete: ActivityAthlete,
    pub name: String,
    pub sport_type: String,
    pub start_date: DateTime<Utc>,

    /// Distance in meters
    #[serde(default)]
    pub distance: f64,

    /// Moving time in seconds
    #[serde(default)]
    pub moving_time: u64,

    /// Elapsed time in seconds
    #[serde(default)]
    pub elapsed_time: u64,

    /// Elevation gain in meters
    #[serde(default)]
    pub total_elevation_gain: f64,

    #[serde(default)]
    pub average_heartrate: Option<f64>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub private: bool,
}
