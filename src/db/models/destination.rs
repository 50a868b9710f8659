use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Destination {
    pub id: String,
    pub name: String,
    pub region: String,
    pub description: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Activity {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
}

/// A destination together with the activities offered there
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationDetail {
    #[serde(flatten)]
    pub destination: Destination,
    pub activities: Vec<Activity>,
}
