use axum::{extract::State, Json};

use kyklos_core::Domain;

use crate::{error::Error, Facade};

pub async fn naked<D: Domain>(
    State(facade): State<Facade<D>>,
) -> Result<Json<serde_json::Value>, Error> {
    let tip = facade.tip().map_err(|e| Error::Database(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "height": tip.best_height,
        "cycle": tip.best_cycle,
        "time": tip.best_time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    })))
}
