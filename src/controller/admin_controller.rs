use std::sync::Arc;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};
use tracing::info;
use crate::controller::AppState;
use crate::helpers::api_error::ApiError;
use crate::helpers::auth::StaffUser;
use crate::models::transport_request::{PaymentRecord, RequestStatus};
use crate::models::user::UserProfile;
use crate::repositories::postgres_repo::{CountedTable, PostgresConnectionRepo};

const DASHBOARD_BUCKETS: usize = 6;
const BUCKET_DAYS: i64 = 30;

pub fn router(app_state: AppState) -> Router {
    let postgres_repo = Arc::new(PostgresConnectionRepo::new(
        app_state.postgres_connection
    ));

    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/users", get(search_users))
        .route("/listings", get(search_listings))
        .route("/listings/complete", post(complete_listings))
        .route("/requests", get(search_requests))
        .route("/requests/approve", post(approve_requests))
        .route("/payments", get(payments))
        .route("/traveler_accounts", get(search_traveler_accounts))
        .route("/traveler_accounts/approve", post(approve_traveler_accounts))
        .route("/traveler_accounts/:id", put(set_traveler_account_approval))
        .route_layer(Extension(postgres_repo))
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct MonthlyBucket {
    pub label: String,
    pub new_users: i64,
    pub new_listings: i64,
}

/// Thirty-day windows ending at `now`, newest first.
fn dashboard_windows(now: OffsetDateTime) -> Vec<(OffsetDateTime, OffsetDateTime)> {
    (0..DASHBOARD_BUCKETS as i64)
        .map(|i| {
            let end = now - Duration::days(BUCKET_DAYS * i);
            (end - Duration::days(BUCKET_DAYS), end)
        })
        .collect()
}

fn month_label(moment: OffsetDateTime) -> String {
    moment
        .format(format_description!("[month repr:short] [year]"))
        .unwrap_or_else(|_| moment.date().to_string())
}

pub async fn dashboard(
    StaffUser(_staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
) -> Result<impl IntoResponse, ApiError> {
    let (users, listings, requests, traveler_account_requests) = futures::try_join!(
        postgres_repo.count_rows(CountedTable::Users),
        postgres_repo.count_rows(CountedTable::Listings),
        postgres_repo.count_rows(CountedTable::TransportRequests),
        postgres_repo.count_rows(CountedTable::TravelerAccountRequests),
    )?;

    let mut buckets = Vec::with_capacity(DASHBOARD_BUCKETS);
    for (from, to) in dashboard_windows(OffsetDateTime::now_utc()) {
        let (new_users, new_listings) = futures::try_join!(
            postgres_repo.count_created_between(CountedTable::Users, from, to),
            postgres_repo.count_created_between(CountedTable::Listings, from, to),
        )?;
        buckets.push(MonthlyBucket {
            label: month_label(to),
            new_users,
            new_listings,
        });
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "users": users,
            "listings": listings,
            "requests": requests,
            "traveler_account_requests": traveler_account_requests,
            "monthly": buckets,
        })),
    ))
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct UserSearch {
    pub search: Option<String>,
    pub is_traveler: Option<bool>,
}

pub async fn search_users(
    StaffUser(_staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Query(query): Query<UserSearch>,
) -> Result<impl IntoResponse, ApiError> {
    let users = postgres_repo
        .search_users(query.search.as_deref(), query.is_traveler)
        .await?;
    let profiles: Vec<UserProfile> = users.iter().map(|u| u.profile()).collect();
    Ok((StatusCode::OK, Json(profiles)))
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ListingSearch {
    pub search: Option<String>,
}

pub async fn search_listings(
    StaffUser(_staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Query(query): Query<ListingSearch>,
) -> Result<impl IntoResponse, ApiError> {
    let listings = postgres_repo.search_listings(query.search.as_deref()).await?;
    Ok((StatusCode::OK, Json(listings)))
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct RequestSearch {
    pub status: Option<RequestStatus>,
    pub search: Option<String>,
}

pub async fn search_requests(
    StaffUser(_staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Query(query): Query<RequestSearch>,
) -> Result<impl IntoResponse, ApiError> {
    let requests = postgres_repo
        .search_requests(query.status, query.search.as_deref())
        .await?;
    Ok((StatusCode::OK, Json(requests)))
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct TravelerAccountSearch {
    pub search: Option<String>,
    pub is_approved: Option<bool>,
}

pub async fn search_traveler_accounts(
    StaffUser(_staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Query(query): Query<TravelerAccountSearch>,
) -> Result<impl IntoResponse, ApiError> {
    let requests = postgres_repo
        .search_traveler_account_requests(query.search.as_deref(), query.is_approved)
        .await?;
    Ok((StatusCode::OK, Json(requests)))
}

#[derive(Serialize, Clone, Debug)]
pub struct TravelerBalance {
    pub user_id: i64,
    pub username: String,
    pub balance: f64,
}

#[derive(Serialize, Clone, Debug)]
pub struct PaymentsOverview {
    pub payments: Vec<PaymentRecord>,
    pub travelers: Vec<TravelerBalance>,
}

pub async fn payments(
    StaffUser(_staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
) -> Result<impl IntoResponse, ApiError> {
    let (payments, travelers) = futures::try_join!(
        postgres_repo.accepted_payments(),
        postgres_repo.search_users(None, Some(true)),
    )?;

    let travelers = travelers
        .into_iter()
        .map(|user| TravelerBalance {
            user_id: user.id,
            username: user.username,
            balance: user.balance,
        })
        .collect();
    Ok((StatusCode::OK, Json(PaymentsOverview { payments, travelers })))
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct BulkIds {
    #[serde(default)]
    pub ids: Vec<i64>,
}

pub async fn complete_listings(
    StaffUser(staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(body): Json<BulkIds>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = postgres_repo.complete_listings(&body.ids).await?;
    info!("Staff {} marked {} listings completed", staff.id, updated);
    Ok((StatusCode::OK, Json(json!({ "updated": updated }))))
}

pub async fn approve_requests(
    StaffUser(staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(body): Json<BulkIds>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = postgres_repo.approve_requests(&body.ids).await?;
    info!("Staff {} force-approved {} transport requests", staff.id, updated);
    Ok((StatusCode::OK, Json(json!({ "updated": updated }))))
}

pub async fn approve_traveler_accounts(
    StaffUser(staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Json(body): Json<BulkIds>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = postgres_repo.approve_traveler_accounts(&body.ids).await?;
    info!("Staff {} approved {} traveler accounts", staff.id, updated);
    Ok((StatusCode::OK, Json(json!({ "updated": updated }))))
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApprovalBody {
    pub is_approved: bool,
}

pub async fn set_traveler_account_approval(
    StaffUser(staff): StaffUser,
    Extension(postgres_repo): Extension<Arc<PostgresConnectionRepo>>,
    Path(id): Path<i64>,
    Json(body): Json<ApprovalBody>,
) -> Result<impl IntoResponse, ApiError> {
    match postgres_repo.set_traveler_account_approval(id, body.is_approved).await? {
        Some(request) => {
            info!(
                "Staff {} set traveler account request {} approval to {}",
                staff.id, id, body.is_approved
            );
            Ok((StatusCode::OK, Json(request)))
        }
        None => Err(ApiError::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use super::*;

    #[test]
    fn dashboard_windows_are_contiguous_and_newest_first() {
        let now = datetime!(2024-07-01 12:00 UTC);
        let windows = dashboard_windows(now);

        assert_eq!(windows.len(), DASHBOARD_BUCKETS);
        assert_eq!(windows[0].1, now);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].0, pair[1].1);
            assert!(pair[0].1 > pair[1].1);
        }
        for (from, to) in &windows {
            assert_eq!(*to - *from, Duration::days(BUCKET_DAYS));
        }
    }

    #[test]
    fn traveler_account_search_parses_filters() {
        let uri: axum::http::Uri = "/admin/traveler_accounts?search=ana&is_approved=false".parse().unwrap();
        let Query(query) = Query::<TravelerAccountSearch>::try_from_uri(&uri).unwrap();
        assert_eq!(query.search.as_deref(), Some("ana"));
        assert_eq!(query.is_approved, Some(false));

        let uri: axum::http::Uri = "/admin/traveler_accounts".parse().unwrap();
        let Query(query) = Query::<TravelerAccountSearch>::try_from_uri(&uri).unwrap();
        assert!(query.search.is_none());
        assert!(query.is_approved.is_none());
    }

    #[test]
    fn month_labels_use_short_month_and_year() {
        assert_eq!(month_label(datetime!(2024-07-01 12:00 UTC)), "Jul 2024");
    }
}
