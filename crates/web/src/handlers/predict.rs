use std::sync::Arc;

use axum::{Json, extract::State};
use ci_insight_analysis::risk::{RiskFeatures, RiskModel, RiskPrediction};

pub async fn predict(
    State(model): State<Arc<RiskModel>>,
    Json(features): Json<RiskFeatures>,
) -> Json<RiskPrediction> {
    Json(model.predict(features))
}
