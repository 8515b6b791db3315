use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::application::usecases::usage_limits::UsageLimitUseCase;
use crate::auth::AuthUser;
use crate::domain::{
    repositories::{plans::PlanRepository, usage_counters::UsageCounterRepository},
    value_objects::usage::UsageAction,
};
use crate::infrastructure::axum_http::error_responses::AppError;

#[derive(Debug, Deserialize)]
pub struct LimitCheckParams {
    pub action: String,
    pub form_id: Option<Uuid>,
}

pub fn routes<P, U>(usecase: Arc<UsageLimitUseCase<P, U>>) -> Router
where
    P: PlanRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
{
    Router::new()
        .route("/check", get(check_limit))
        .with_state(usecase)
}

pub async fn check_limit<P, U>(
    State(usecase): State<Arc<UsageLimitUseCase<P, U>>>,
    auth: AuthUser,
    Query(params): Query<LimitCheckParams>,
) -> Result<impl IntoResponse, AppError>
where
    P: PlanRepository + Send + Sync + 'static,
    U: UsageCounterRepository + Send + Sync + 'static,
{
    let action = match (params.action.as_str(), params.form_id) {
        ("create_form", _) => UsageAction::CreateForm,
        ("submit_form", Some(form_id)) => UsageAction::SubmitForm { form_id },
        ("export_data", Some(form_id)) => UsageAction::ExportData { form_id },
        ("submit_form" | "export_data", None) => {
            return Err(AppError::BadRequest(
                "form_id is required for this action".to_string(),
            ));
        }
        (other, _) => {
            return Err(AppError::BadRequest(format!("unknown action: {other}")));
        }
    };

    let check = usecase
        .check_limit(auth.user_id, action)
        .await
        .map_err(|err| AppError::Internal(err.into()))?;
    Ok(Json(check))
}
