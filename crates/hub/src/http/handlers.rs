//! Page handlers

use axum::{
    extract::{Path, State},
    http::header,
    response::{Html, IntoResponse, Redirect, Response},
    Extension, Form, Json,
};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::controller::SpawnOutcome;
use crate::error::{DossierError, Result};
use crate::forms::UserOptions;
use crate::identity::HubUser;
use crate::session::SessionSummary;
use crate::views::View;

/// `/{page}/{user}/{server}` path segments
#[derive(Debug, Default, Deserialize)]
pub struct Target {
    #[serde(default)]
    user: String,
    #[serde(default)]
    server: String,
}

#[derive(Debug, Deserialize)]
pub struct TenantSelection {
    tenant: String,
}

#[derive(Debug, Deserialize)]
pub struct SpawnerSelection {
    spawner: String,
}

/// The user a request acts on. Acting on somebody else needs admin rights
/// and a user the hub has already seen.
async fn target_user(
    state: &AppState,
    current: HubUser,
    target: Option<Path<Target>>,
) -> Result<(HubUser, String)> {
    let Target { user, server } = target.map(|Path(t)| t).unwrap_or_default();
    if user.is_empty() || user == current.name {
        return Ok((current, server));
    }
    if !current.admin {
        return Err(DossierError::Forbidden(format!(
            "User {} may not act on behalf of {user}",
            current.name
        )));
    }
    match state.controller.known_user(&user).await {
        Some(other) => Ok((other, server)),
        None => Err(DossierError::not_found("User", user)),
    }
}

fn render(state: &AppState, view: View<'_>) -> Result<Response> {
    Ok(Html(state.renderer.render(view)?).into_response())
}

fn respond(state: &AppState, user: &HubUser, server: &str, outcome: SpawnOutcome) -> Result<Response> {
    match outcome {
        SpawnOutcome::NeedsTenant(_) => {
            Ok(Redirect::to(&state.page_url("tenant", &user.name, server)).into_response())
        }
        SpawnOutcome::NeedsBackend(_) => {
            Ok(Redirect::to(&state.page_url("spawner", &user.name, server)).into_response())
        }
        SpawnOutcome::Options(form) => render(
            state,
            View::Options {
                action: &state.page_url("spawn", &user.name, server),
                form: &form,
            },
        ),
        SpawnOutcome::Ready { route, .. } => Ok(Redirect::to(&route).into_response()),
    }
}

pub async fn spawn_page(
    State(state): State<AppState>,
    Extension(current): Extension<HubUser>,
    target: Option<Path<Target>>,
) -> Result<Response> {
    let (user, server) = target_user(&state, current, target).await?;
    let outcome = state.controller.spawn(&user, &server, None).await?;
    respond(&state, &user, &server, outcome)
}

pub async fn spawn_submit(
    State(state): State<AppState>,
    Extension(current): Extension<HubUser>,
    target: Option<Path<Target>>,
    Form(options): Form<UserOptions>,
) -> Result<Response> {
    let (user, server) = target_user(&state, current, target).await?;
    let outcome = state.controller.spawn(&user, &server, Some(options)).await?;
    respond(&state, &user, &server, outcome)
}

pub async fn tenant_page(
    State(state): State<AppState>,
    Extension(current): Extension<HubUser>,
    target: Option<Path<Target>>,
) -> Result<Response> {
    let (user, server) = target_user(&state, current, target).await?;
    let choices = state.controller.tenant_choices(&user).await?;
    render(
        &state,
        View::Tenants {
            action: &state.page_url("tenant", &user.name, &server),
            choices: &choices,
        },
    )
}

pub async fn tenant_submit(
    State(state): State<AppState>,
    Extension(current): Extension<HubUser>,
    target: Option<Path<Target>>,
    Form(selection): Form<TenantSelection>,
) -> Result<Response> {
    let (user, server) = target_user(&state, current, target).await?;
    let tenant = state
        .controller
        .select_tenant(&user, &server, &selection.tenant)
        .await?;
    info!(user = %user.name, tenant = %tenant, "Tenant selected");
    Ok(Redirect::to(&state.page_url("spawn", &user.name, &server)).into_response())
}

pub async fn spawner_page(
    State(state): State<AppState>,
    Extension(current): Extension<HubUser>,
    target: Option<Path<Target>>,
) -> Result<Response> {
    let (user, server) = target_user(&state, current, target).await?;
    let choices = state.controller.backend_choices(&user, &server).await?;
    render(
        &state,
        View::Spawners {
            action: &state.page_url("spawner", &user.name, &server),
            choices: &choices,
        },
    )
}

pub async fn spawner_submit(
    State(state): State<AppState>,
    Extension(current): Extension<HubUser>,
    target: Option<Path<Target>>,
    Form(selection): Form<SpawnerSelection>,
) -> Result<Response> {
    let (user, server) = target_user(&state, current, target).await?;
    let spawner = state
        .controller
        .select_backend(&user, &server, &selection.spawner)
        .await?;
    info!(user = %user.name, spawner = %spawner, "Spawner selected");
    Ok(Redirect::to(&state.page_url("spawn", &user.name, &server)).into_response())
}

/// Clear the user's sessions, then the hub cookie
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<HubUser>,
) -> Result<Response> {
    state.controller.logout(&user.name).await?;
    let cookie = format!(
        "{}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax",
        state.config.auth.cookie_name
    );
    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::to(&state.base_url()),
    )
        .into_response())
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(current): Extension<HubUser>,
    target: Option<Path<Target>>,
) -> Result<Json<Vec<SessionSummary>>> {
    let (user, _) = target_user(&state, current, target).await?;
    Ok(Json(state.controller.sessions(&user.name).await?))
}
