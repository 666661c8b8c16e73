use std::collections::HashMap;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bb8_postgres::bb8::{Pool, PooledConnection};
use bb8_postgres::PostgresConnectionManager;
use bb8_postgres::tokio_postgres::{NoTls, Row, Transaction};
use time::OffsetDateTime;
use tracing::{info, warn};
use crate::models::listing::{Listing, ListingDetail, ListingPayload, ListingPriceTier, ListingTag};
use crate::models::price_tier::{NewPriceTier, PriceTier};
use crate::models::tag::Tag;
use crate::models::transport_request::{
    NewTransportRequest, PaymentRecord, PendingRequest, RequestStatus, Requester, TransportRequest,
};
use crate::models::traveler_account::{TravelerAccountPayload, TravelerAccountRequest};
use crate::models::user::{NewUser, User, UserUpdate};
use crate::repositories::RequestStore;

pub const RETRY_LIMIT: usize = 5;

const SCHEMA: &str = include_str!("schema.sql");

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, phone_number, \
    address, date_of_birth, passport_number, is_traveler, is_staff, is_active, balance, date_joined, last_login";

const LISTING_COLUMNS: &str = "id, creator_id, origin, destination, max_weight, max_volume, \
    departure_at, arrival_at, is_completed, created_at, updated_at";

const REQUEST_COLUMNS: &str = "id, user_id, listing_id, status, weight, volume, total_price, \
    payment_link, created_at, accepted_at";

/// Tables the staff dashboard counts rows of.
#[derive(Clone, Copy, Debug)]
pub enum CountedTable {
    Users,
    Listings,
    TransportRequests,
    TravelerAccountRequests,
}

impl CountedTable {
    fn table(&self) -> &'static str {
        match self {
            CountedTable::Users => "users",
            CountedTable::Listings => "listings",
            CountedTable::TransportRequests => "transport_requests",
            CountedTable::TravelerAccountRequests => "traveler_account_requests",
        }
    }

    fn created_column(&self) -> &'static str {
        match self {
            CountedTable::Users => "date_joined",
            _ => "created_at",
        }
    }
}

pub struct PostgresConnectionRepo {
    postgres_connection: Pool<PostgresConnectionManager<NoTls>>,
}

impl PostgresConnectionRepo {
    pub fn new(
        postgres_connection: Pool<PostgresConnectionManager<NoTls>>,
    ) -> Self {
        Self {
            postgres_connection
        }
    }

    async fn get_postgres_connection(
        &self,
    ) -> anyhow::Result<PooledConnection<PostgresConnectionManager<NoTls>>> {
        for _ in 0..RETRY_LIMIT {
            match self.postgres_connection.get().await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    warn!("Failed to retrieve postgres connection due to: {}, retrying in 3s", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(3)).await;
                    continue;
                }
            }
        }

        Err(anyhow!("Failed to retrieve a valid connection from postgres pool, BAILING"))
    }

    pub async fn bootstrap_schema(&self) -> anyhow::Result<()> {
        let conn = self.get_postgres_connection().await?;
        conn.batch_execute(SCHEMA)
            .await
            .context("Failed to bootstrap database schema")?;
        info!("Database schema is up to date");
        Ok(())
    }

    /// Single-attempt connectivity probe for readiness checks.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let conn = self.postgres_connection.get().await?;
        conn.simple_query("SELECT 1;").await?;
        Ok(())
    }

    // Users and credentials

    pub async fn create_user(
        &self,
        new_user: &NewUser,
    ) -> anyhow::Result<User> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "INSERT INTO users (username, email, password_hash, first_name, last_name) \
            VALUES ($1, $2, $3, $4, $5) RETURNING {};",
            USER_COLUMNS
        );

        let row = conn
            .query_one(
                &stmt,
                &[
                    &new_user.username,
                    &new_user.email,
                    &new_user.password_hash,
                    &new_user.first_name,
                    &new_user.last_name,
                ],
            )
            .await
            .with_context(|| format!("Failed to create user: {}", new_user.username))?;

        Ok(parse_row_into_user(&row))
    }

    pub async fn username_exists(
        &self,
        username: &str,
        excluding_user: Option<i64>,
    ) -> anyhow::Result<bool> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 AND ($2::BIGINT IS NULL OR id <> $2));",
                &[&username, &excluding_user],
            )
            .await?;
        Ok(row.get(0))
    }

    pub async fn email_exists(
        &self,
        email: &str,
        excluding_user: Option<i64>,
    ) -> anyhow::Result<bool> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM users WHERE lower(email) = lower($1) AND ($2::BIGINT IS NULL OR id <> $2));",
                &[&email, &excluding_user],
            )
            .await?;
        Ok(row.get(0))
    }

    pub async fn retrieve_user_by_email(
        &self,
        email: &str,
    ) -> anyhow::Result<Option<User>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!("SELECT {} FROM users WHERE lower(email) = lower($1);", USER_COLUMNS);
        let row = conn.query_opt(&stmt, &[&email]).await?;
        Ok(row.as_ref().map(parse_row_into_user))
    }

    pub async fn list_users(
        &self,
        username: Option<&str>,
    ) -> anyhow::Result<Vec<User>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "SELECT {} FROM users WHERE ($1::TEXT IS NULL OR username = $1) ORDER BY username;",
            USER_COLUMNS
        );
        let rows = conn.query(&stmt, &[&username]).await?;
        Ok(rows.iter().map(parse_row_into_user).collect())
    }

    pub async fn update_user(
        &self,
        user_id: i64,
        update: &UserUpdate,
        password_hash: Option<String>,
    ) -> anyhow::Result<Option<User>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "UPDATE users SET \
                username = COALESCE($2, username), \
                email = COALESCE($3, email), \
                first_name = COALESCE($4, first_name), \
                last_name = COALESCE($5, last_name), \
                phone_number = COALESCE($6, phone_number), \
                address = COALESCE($7, address), \
                date_of_birth = COALESCE($8, date_of_birth), \
                passport_number = COALESCE($9, passport_number), \
                password_hash = COALESCE($10, password_hash) \
            WHERE id = $1 RETURNING {};",
            USER_COLUMNS
        );

        let row = conn
            .query_opt(
                &stmt,
                &[
                    &user_id,
                    &update.username,
                    &update.email,
                    &update.first_name,
                    &update.last_name,
                    &update.phone_number,
                    &update.address,
                    &update.date_of_birth,
                    &update.passport_number,
                    &password_hash,
                ],
            )
            .await
            .with_context(|| format!("Failed to update user: {}", user_id))?;

        Ok(row.as_ref().map(parse_row_into_user))
    }

    pub async fn record_login(
        &self,
        user_id: i64,
    ) -> anyhow::Result<()> {
        let conn = self.get_postgres_connection().await?;
        let res = conn
            .execute("UPDATE users SET last_login = now() WHERE id = $1;", &[&user_id])
            .await;
        if let Err(e) = res {
            warn!("Failed to record last login for user: {}, due to: {}", user_id, e);
        }
        Ok(())
    }

    pub async fn get_or_create_token(
        &self,
        user_id: i64,
        candidate_key: &str,
    ) -> anyhow::Result<String> {
        let conn = self.get_postgres_connection().await?;
        conn.execute(
            "INSERT INTO auth_tokens (key, user_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING;",
            &[&candidate_key, &user_id],
        ).await?;
        let row = conn
            .query_one("SELECT key FROM auth_tokens WHERE user_id = $1;", &[&user_id])
            .await?;
        Ok(row.get("key"))
    }

    pub async fn user_for_token(
        &self,
        key: &str,
    ) -> anyhow::Result<Option<User>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "SELECT {} FROM users WHERE is_active AND id = (SELECT user_id FROM auth_tokens WHERE key = $1);",
            USER_COLUMNS
        );
        let row = conn.query_opt(&stmt, &[&key]).await?;
        Ok(row.as_ref().map(parse_row_into_user))
    }

    pub async fn create_password_reset_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let conn = self.get_postgres_connection().await?;
        conn.execute(
            "INSERT INTO password_reset_tokens (token, user_id, expires_at) VALUES ($1, $2, $3);",
            &[&token, &user_id, &expires_at],
        )
            .await
            .with_context(|| format!("Failed to store password reset token for user: {}", user_id))?;
        Ok(())
    }

    pub async fn is_valid_reset_token(
        &self,
        user_id: i64,
        token: &str,
    ) -> anyhow::Result<bool> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM password_reset_tokens \
                WHERE token = $1 AND user_id = $2 AND NOT used AND expires_at > now());",
                &[&token, &user_id],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Consumes the reset token and stores the new hash atomically.
    pub async fn reset_password(
        &self,
        user_id: i64,
        token: &str,
        password_hash: &str,
    ) -> anyhow::Result<bool> {
        let mut conn = self.get_postgres_connection().await?;
        let tx = conn.transaction().await?;
        let consumed = tx
            .execute(
                "UPDATE password_reset_tokens SET used = TRUE \
                WHERE token = $1 AND user_id = $2 AND NOT used AND expires_at > now();",
                &[&token, &user_id],
            )
            .await?;
        if consumed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.execute(
            "UPDATE users SET password_hash = $2 WHERE id = $1;",
            &[&user_id, &password_hash],
        ).await?;
        tx.commit().await?;
        Ok(true)
    }

    // Traveler account requests

    pub async fn create_traveler_account_request(
        &self,
        user_id: i64,
        payload: &TravelerAccountPayload,
    ) -> anyhow::Result<TravelerAccountRequest> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_one(
                "INSERT INTO traveler_account_requests (user_id, passport_number, address) \
                VALUES ($1, $2, $3) RETURNING *;",
                &[&user_id, &payload.passport_number, &payload.address],
            )
            .await
            .with_context(|| format!("Failed to create traveler account request for user: {}", user_id))?;
        Ok(parse_row_into_traveler_account_request(&row))
    }

    pub async fn list_traveler_account_requests(
        &self,
        user_id: i64,
    ) -> anyhow::Result<Vec<TravelerAccountRequest>> {
        let conn = self.get_postgres_connection().await?;
        let rows = conn
            .query(
                "SELECT * FROM traveler_account_requests WHERE user_id = $1 ORDER BY created_at DESC;",
                &[&user_id],
            )
            .await?;
        Ok(rows.iter().map(parse_row_into_traveler_account_request).collect())
    }

    /// Staff view: search applicant username or passport, optionally by approval state.
    pub async fn search_traveler_account_requests(
        &self,
        search: Option<&str>,
        is_approved: Option<bool>,
    ) -> anyhow::Result<Vec<TravelerAccountRequest>> {
        let conn = self.get_postgres_connection().await?;
        let pattern = search.map(|s| format!("%{}%", s));
        let rows = conn
            .query(
                "SELECT t.* FROM traveler_account_requests t JOIN users u ON u.id = t.user_id WHERE \
                    ($1::TEXT IS NULL OR u.username ILIKE $1 OR t.passport_number ILIKE $1) \
                    AND ($2::BOOLEAN IS NULL OR t.is_approved = $2) \
                ORDER BY t.created_at DESC;",
                &[&pattern, &is_approved],
            )
            .await?;
        Ok(rows.iter().map(parse_row_into_traveler_account_request).collect())
    }

    pub async fn retrieve_traveler_account_request(
        &self,
        id: i64,
    ) -> anyhow::Result<Option<TravelerAccountRequest>> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_opt("SELECT * FROM traveler_account_requests WHERE id = $1;", &[&id])
            .await?;
        Ok(row.as_ref().map(parse_row_into_traveler_account_request))
    }

    pub async fn update_traveler_account_request(
        &self,
        id: i64,
        payload: &TravelerAccountPayload,
    ) -> anyhow::Result<Option<TravelerAccountRequest>> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_opt(
                "UPDATE traveler_account_requests SET \
                    passport_number = COALESCE($2, passport_number), \
                    address = COALESCE($3, address) \
                WHERE id = $1 RETURNING *;",
                &[&id, &payload.passport_number, &payload.address],
            )
            .await?;
        Ok(row.as_ref().map(parse_row_into_traveler_account_request))
    }

    pub async fn delete_traveler_account_request(
        &self,
        id: i64,
    ) -> anyhow::Result<bool> {
        let conn = self.get_postgres_connection().await?;
        let deleted = conn
            .execute("DELETE FROM traveler_account_requests WHERE id = $1;", &[&id])
            .await?;
        Ok(deleted > 0)
    }

    /// Sets the approval flag and mirrors it onto the applicant's traveler flag.
    pub async fn set_traveler_account_approval(
        &self,
        id: i64,
        approved: bool,
    ) -> anyhow::Result<Option<TravelerAccountRequest>> {
        let mut conn = self.get_postgres_connection().await?;
        let tx = conn.transaction().await?;
        let row = tx
            .query_opt(
                "UPDATE traveler_account_requests SET is_approved = $2 WHERE id = $1 RETURNING *;",
                &[&id, &approved],
            )
            .await?;
        let request = match row {
            Some(row) => parse_row_into_traveler_account_request(&row),
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        tx.execute(
            "UPDATE users SET is_traveler = $2 WHERE id = $1;",
            &[&request.user_id, &approved],
        ).await?;
        tx.commit().await?;
        Ok(Some(request))
    }

    pub async fn approve_traveler_accounts(
        &self,
        ids: &[i64],
    ) -> anyhow::Result<u64> {
        let mut conn = self.get_postgres_connection().await?;
        let tx = conn.transaction().await?;
        let approved = tx
            .execute(
                "UPDATE traveler_account_requests SET is_approved = TRUE WHERE id = ANY($1);",
                &[&ids],
            )
            .await?;
        tx.execute(
            "UPDATE users SET is_traveler = TRUE \
            WHERE id IN (SELECT user_id FROM traveler_account_requests WHERE id = ANY($1));",
            &[&ids],
        ).await?;
        tx.commit().await?;
        Ok(approved)
    }

    // Tags

    pub async fn list_tags(
        &self,
    ) -> anyhow::Result<Vec<Tag>> {
        let conn = self.get_postgres_connection().await?;
        let rows = conn.query("SELECT id, name FROM tags ORDER BY name;", &[]).await?;
        Ok(rows.iter().map(parse_row_into_tag).collect())
    }

    pub async fn create_tag(
        &self,
        name: &str,
    ) -> anyhow::Result<Tag> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_one("INSERT INTO tags (name) VALUES ($1) RETURNING id, name;", &[&name])
            .await?;
        Ok(parse_row_into_tag(&row))
    }

    pub async fn retrieve_tag(
        &self,
        id: i64,
    ) -> anyhow::Result<Option<Tag>> {
        let conn = self.get_postgres_connection().await?;
        let row = conn.query_opt("SELECT id, name FROM tags WHERE id = $1;", &[&id]).await?;
        Ok(row.as_ref().map(parse_row_into_tag))
    }

    pub async fn update_tag(
        &self,
        id: i64,
        name: &str,
    ) -> anyhow::Result<Option<Tag>> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_opt("UPDATE tags SET name = $2 WHERE id = $1 RETURNING id, name;", &[&id, &name])
            .await?;
        Ok(row.as_ref().map(parse_row_into_tag))
    }

    pub async fn delete_tag(
        &self,
        id: i64,
    ) -> anyhow::Result<bool> {
        let conn = self.get_postgres_connection().await?;
        Ok(conn.execute("DELETE FROM tags WHERE id = $1;", &[&id]).await? > 0)
    }

    pub async fn existing_tag_ids(
        &self,
        ids: &[i64],
    ) -> anyhow::Result<Vec<i64>> {
        let conn = self.get_postgres_connection().await?;
        let rows = conn.query("SELECT id FROM tags WHERE id = ANY($1);", &[&ids]).await?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    // Price tiers

    pub async fn list_price_tiers(
        &self,
    ) -> anyhow::Result<Vec<PriceTier>> {
        let conn = self.get_postgres_connection().await?;
        let rows = conn
            .query("SELECT * FROM price_tiers ORDER BY min_weight NULLS FIRST, id;", &[])
            .await?;
        Ok(rows.iter().map(parse_row_into_price_tier).collect())
    }

    pub async fn create_price_tier(
        &self,
        tier: &NewPriceTier,
    ) -> anyhow::Result<PriceTier> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_one(
                "INSERT INTO price_tiers (min_weight, max_weight, price) VALUES ($1, $2, $3) RETURNING *;",
                &[&tier.min_weight, &tier.max_weight, &tier.price],
            )
            .await?;
        Ok(parse_row_into_price_tier(&row))
    }

    pub async fn retrieve_price_tier(
        &self,
        id: i64,
    ) -> anyhow::Result<Option<PriceTier>> {
        let conn = self.get_postgres_connection().await?;
        let row = conn.query_opt("SELECT * FROM price_tiers WHERE id = $1;", &[&id]).await?;
        Ok(row.as_ref().map(parse_row_into_price_tier))
    }

    pub async fn update_price_tier(
        &self,
        id: i64,
        tier: &NewPriceTier,
    ) -> anyhow::Result<Option<PriceTier>> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_opt(
                "UPDATE price_tiers SET min_weight = $2, max_weight = $3, price = $4 WHERE id = $1 RETURNING *;",
                &[&id, &tier.min_weight, &tier.max_weight, &tier.price],
            )
            .await?;
        Ok(row.as_ref().map(parse_row_into_price_tier))
    }

    pub async fn delete_price_tier(
        &self,
        id: i64,
    ) -> anyhow::Result<bool> {
        let conn = self.get_postgres_connection().await?;
        Ok(conn.execute("DELETE FROM price_tiers WHERE id = $1;", &[&id]).await? > 0)
    }

    // Listings

    pub async fn create_listing(
        &self,
        creator_id: i64,
        payload: &ListingPayload,
    ) -> anyhow::Result<Listing> {
        let mut conn = self.get_postgres_connection().await?;
        let tx = conn.transaction().await?;
        let stmt = format!(
            "INSERT INTO listings (creator_id, origin, destination, max_weight, max_volume, departure_at, arrival_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {};",
            LISTING_COLUMNS
        );
        let row = tx
            .query_one(
                &stmt,
                &[
                    &creator_id,
                    &payload.origin,
                    &payload.destination,
                    &payload.max_weight,
                    &payload.max_volume,
                    &payload.departure_at,
                    &payload.arrival_at,
                ],
            )
            .await
            .with_context(|| format!("Failed to create listing for user: {}", creator_id))?;
        let listing = parse_row_into_listing(&row);

        attach_tags(&tx, listing.id, &payload.tags).await?;
        attach_price_tiers(&tx, listing.id, &payload.price_tiers).await?;
        tx.commit().await?;

        Ok(listing)
    }

    pub async fn list_listings(
        &self,
        creator_id: Option<i64>,
    ) -> anyhow::Result<Vec<Listing>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "SELECT {} FROM listings WHERE ($1::BIGINT IS NULL OR creator_id = $1) ORDER BY created_at DESC;",
            LISTING_COLUMNS
        );
        let rows = conn.query(&stmt, &[&creator_id]).await?;
        Ok(rows.iter().map(parse_row_into_listing).collect())
    }

    pub async fn retrieve_listing(
        &self,
        listing_id: i64,
    ) -> anyhow::Result<Option<Listing>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!("SELECT {} FROM listings WHERE id = $1;", LISTING_COLUMNS);
        let row = conn.query_opt(&stmt, &[&listing_id]).await?;
        Ok(row.as_ref().map(parse_row_into_listing))
    }

    pub async fn retrieve_listing_detail(
        &self,
        listing_id: i64,
    ) -> anyhow::Result<Option<ListingDetail>> {
        let listing = match self.retrieve_listing(listing_id).await? {
            Some(listing) => listing,
            None => return Ok(None),
        };

        let (tags, price_tiers) = futures::try_join!(
            self.tags_for_listing(listing_id),
            self.price_tiers_for_listing(listing_id),
        )?;

        Ok(Some(ListingDetail {
            listing,
            tags,
            price_tiers,
        }))
    }

    pub async fn tags_for_listing(
        &self,
        listing_id: i64,
    ) -> anyhow::Result<Vec<Tag>> {
        let conn = self.get_postgres_connection().await?;
        let rows = conn
            .query(
                "SELECT t.id, t.name FROM tags t \
                JOIN listing_tags lt ON lt.tag_id = t.id WHERE lt.listing_id = $1 ORDER BY t.name;",
                &[&listing_id],
            )
            .await?;
        Ok(rows.iter().map(parse_row_into_tag).collect())
    }

    /// Replaces scalar fields, and tags/tiers when given, in one transaction.
    pub async fn update_listing(
        &self,
        listing: &Listing,
        tags: Option<&[i64]>,
        price_tiers: Option<&[NewPriceTier]>,
    ) -> anyhow::Result<Listing> {
        let mut conn = self.get_postgres_connection().await?;
        let tx = conn.transaction().await?;
        let stmt = format!(
            "UPDATE listings SET origin = $2, destination = $3, max_weight = $4, max_volume = $5, \
                departure_at = $6, arrival_at = $7, is_completed = $8, updated_at = now() \
            WHERE id = $1 RETURNING {};",
            LISTING_COLUMNS
        );
        let row = tx
            .query_one(
                &stmt,
                &[
                    &listing.id,
                    &listing.origin,
                    &listing.destination,
                    &listing.max_weight,
                    &listing.max_volume,
                    &listing.departure_at,
                    &listing.arrival_at,
                    &listing.is_completed,
                ],
            )
            .await
            .with_context(|| format!("Failed to update listing: {}", listing.id))?;

        if let Some(tags) = tags {
            tx.execute("DELETE FROM listing_tags WHERE listing_id = $1;", &[&listing.id]).await?;
            attach_tags(&tx, listing.id, tags).await?;
        }
        if let Some(price_tiers) = price_tiers {
            tx.execute(
                "DELETE FROM price_tiers WHERE id IN \
                (SELECT price_tier_id FROM listing_price_tiers WHERE listing_id = $1);",
                &[&listing.id],
            ).await?;
            attach_price_tiers(&tx, listing.id, price_tiers).await?;
        }
        tx.commit().await?;

        Ok(parse_row_into_listing(&row))
    }

    pub async fn delete_listing(
        &self,
        listing_id: i64,
    ) -> anyhow::Result<bool> {
        let conn = self.get_postgres_connection().await?;
        Ok(conn.execute("DELETE FROM listings WHERE id = $1;", &[&listing_id]).await? > 0)
    }

    pub async fn complete_listings(
        &self,
        ids: &[i64],
    ) -> anyhow::Result<u64> {
        let conn = self.get_postgres_connection().await?;
        let updated = conn
            .execute(
                "UPDATE listings SET is_completed = TRUE, updated_at = now() WHERE id = ANY($1);",
                &[&ids],
            )
            .await?;
        Ok(updated)
    }

    // Listing join rows

    pub async fn list_listing_tags(
        &self,
        listing_id: Option<i64>,
    ) -> anyhow::Result<Vec<ListingTag>> {
        let conn = self.get_postgres_connection().await?;
        let rows = conn
            .query(
                "SELECT lt.id, lt.listing_id, t.id AS tag_id, t.name FROM listing_tags lt \
                JOIN tags t ON t.id = lt.tag_id WHERE ($1::BIGINT IS NULL OR lt.listing_id = $1) ORDER BY lt.id;",
                &[&listing_id],
            )
            .await?;
        Ok(rows.iter().map(parse_row_into_listing_tag).collect())
    }

    pub async fn retrieve_listing_tag(
        &self,
        id: i64,
    ) -> anyhow::Result<Option<ListingTag>> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_opt(
                "SELECT lt.id, lt.listing_id, t.id AS tag_id, t.name FROM listing_tags lt \
                JOIN tags t ON t.id = lt.tag_id WHERE lt.id = $1;",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(parse_row_into_listing_tag))
    }

    pub async fn create_listing_tag(
        &self,
        listing_id: i64,
        tag_id: i64,
    ) -> anyhow::Result<Option<ListingTag>> {
        let id: i64 = {
            let conn = self.get_postgres_connection().await?;
            conn.query_one(
                "INSERT INTO listing_tags (listing_id, tag_id) VALUES ($1, $2) RETURNING id;",
                &[&listing_id, &tag_id],
            )
                .await
                .with_context(|| format!("Failed to tag listing: {} with tag: {}", listing_id, tag_id))?
                .get("id")
        };
        self.retrieve_listing_tag(id).await
    }

    pub async fn delete_listing_tag(
        &self,
        id: i64,
    ) -> anyhow::Result<bool> {
        let conn = self.get_postgres_connection().await?;
        Ok(conn.execute("DELETE FROM listing_tags WHERE id = $1;", &[&id]).await? > 0)
    }

    pub async fn list_listing_price_tiers(
        &self,
        listing_id: Option<i64>,
    ) -> anyhow::Result<Vec<ListingPriceTier>> {
        let conn = self.get_postgres_connection().await?;
        let rows = conn
            .query(
                "SELECT lp.id AS join_id, lp.listing_id, p.* FROM listing_price_tiers lp \
                JOIN price_tiers p ON p.id = lp.price_tier_id \
                WHERE ($1::BIGINT IS NULL OR lp.listing_id = $1) ORDER BY lp.id;",
                &[&listing_id],
            )
            .await?;
        Ok(rows.iter().map(parse_row_into_listing_price_tier).collect())
    }

    pub async fn retrieve_listing_price_tier(
        &self,
        id: i64,
    ) -> anyhow::Result<Option<ListingPriceTier>> {
        let conn = self.get_postgres_connection().await?;
        let row = conn
            .query_opt(
                "SELECT lp.id AS join_id, lp.listing_id, p.* FROM listing_price_tiers lp \
                JOIN price_tiers p ON p.id = lp.price_tier_id WHERE lp.id = $1;",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(parse_row_into_listing_price_tier))
    }

    pub async fn create_listing_price_tier(
        &self,
        listing_id: i64,
        price_tier_id: i64,
    ) -> anyhow::Result<Option<ListingPriceTier>> {
        let id: i64 = {
            let conn = self.get_postgres_connection().await?;
            conn.query_one(
                "INSERT INTO listing_price_tiers (listing_id, price_tier_id) VALUES ($1, $2) RETURNING id;",
                &[&listing_id, &price_tier_id],
            )
                .await
                .with_context(|| format!("Failed to attach tier: {} to listing: {}", price_tier_id, listing_id))?
                .get("id")
        };
        self.retrieve_listing_price_tier(id).await
    }

    pub async fn delete_listing_price_tier(
        &self,
        id: i64,
    ) -> anyhow::Result<bool> {
        let conn = self.get_postgres_connection().await?;
        Ok(conn.execute("DELETE FROM listing_price_tiers WHERE id = $1;", &[&id]).await? > 0)
    }

    // Transport requests

    pub async fn create_transport_request(
        &self,
        new_request: &NewTransportRequest,
    ) -> anyhow::Result<TransportRequest> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "INSERT INTO transport_requests (user_id, listing_id, weight, volume, total_price) \
            VALUES ($1, $2, $3, $4, $5) RETURNING {};",
            REQUEST_COLUMNS
        );
        let row = conn
            .query_one(
                &stmt,
                &[
                    &new_request.user_id,
                    &new_request.listing_id,
                    &new_request.weight,
                    &new_request.volume,
                    &new_request.total_price,
                ],
            )
            .await
            .with_context(|| format!("Failed to create request on listing: {}", new_request.listing_id))?;
        parse_row_into_transport_request(&row)
    }

    /// Rewrites a pending request in place; `None` once it has left pending.
    pub async fn update_transport_request(
        &self,
        request_id: i64,
        update: &NewTransportRequest,
    ) -> anyhow::Result<Option<TransportRequest>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "UPDATE transport_requests SET listing_id = $3, weight = $4, volume = $5, total_price = $6 \
            WHERE id = $1 AND user_id = $2 AND status = 'pending' RETURNING {};",
            REQUEST_COLUMNS
        );
        let row = conn
            .query_opt(
                &stmt,
                &[
                    &request_id,
                    &update.user_id,
                    &update.listing_id,
                    &update.weight,
                    &update.volume,
                    &update.total_price,
                ],
            )
            .await
            .with_context(|| format!("Failed to update request: {}", request_id))?;
        match row {
            Some(row) => Ok(Some(parse_row_into_transport_request(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_user_requests(
        &self,
        user_id: i64,
    ) -> anyhow::Result<Vec<TransportRequest>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "SELECT {} FROM transport_requests WHERE user_id = $1 ORDER BY created_at DESC;",
            REQUEST_COLUMNS
        );
        let rows = conn.query(&stmt, &[&user_id]).await?;
        rows.iter().map(parse_row_into_transport_request).collect()
    }

    /// Requests placed on listings the given user created.
    pub async fn list_incoming_requests(
        &self,
        creator_id: i64,
        status: Option<RequestStatus>,
    ) -> anyhow::Result<Vec<TransportRequest>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "SELECT {} FROM transport_requests \
            WHERE listing_id IN (SELECT id FROM listings WHERE creator_id = $1) \
            AND ($2::TEXT IS NULL OR status = $2) ORDER BY created_at DESC;",
            REQUEST_COLUMNS
        );
        let status = status.map(|s| s.as_str());
        let rows = conn.query(&stmt, &[&creator_id, &status]).await?;
        rows.iter().map(parse_row_into_transport_request).collect()
    }

    pub async fn retrieve_transport_request(
        &self,
        request_id: i64,
    ) -> anyhow::Result<Option<TransportRequest>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!("SELECT {} FROM transport_requests WHERE id = $1;", REQUEST_COLUMNS);
        match conn.query_opt(&stmt, &[&request_id]).await? {
            Some(row) => Ok(Some(parse_row_into_transport_request(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_transport_request(
        &self,
        request_id: i64,
    ) -> anyhow::Result<bool> {
        let conn = self.get_postgres_connection().await?;
        let deleted = conn
            .execute(
                "DELETE FROM transport_requests WHERE id = $1 AND status = 'pending';",
                &[&request_id],
            )
            .await?;
        Ok(deleted > 0)
    }

    /// Staff override; accepts without a payment link.
    pub async fn approve_requests(
        &self,
        ids: &[i64],
    ) -> anyhow::Result<u64> {
        let conn = self.get_postgres_connection().await?;
        let updated = conn
            .execute(
                "UPDATE transport_requests SET status = 'accepted', accepted_at = now() \
                WHERE id = ANY($1) AND status <> 'accepted';",
                &[&ids],
            )
            .await?;
        Ok(updated)
    }

    // Staff console

    pub async fn count_rows(
        &self,
        table: CountedTable,
    ) -> anyhow::Result<i64> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!("SELECT COUNT(*) FROM {};", table.table());
        Ok(conn.query_one(&stmt, &[]).await?.get(0))
    }

    pub async fn count_created_between(
        &self,
        table: CountedTable,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> anyhow::Result<i64> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "SELECT COUNT(*) FROM {table} WHERE {column} >= $1 AND {column} < $2;",
            table = table.table(),
            column = table.created_column(),
        );
        Ok(conn.query_one(&stmt, &[&from, &to]).await?.get(0))
    }

    pub async fn search_users(
        &self,
        search: Option<&str>,
        is_traveler: Option<bool>,
    ) -> anyhow::Result<Vec<User>> {
        let conn = self.get_postgres_connection().await?;
        let pattern = search.map(|s| format!("%{}%", s));
        let stmt = format!(
            "SELECT {} FROM users WHERE \
                ($1::TEXT IS NULL OR username ILIKE $1 OR email ILIKE $1 OR first_name ILIKE $1 \
                    OR last_name ILIKE $1 OR phone_number ILIKE $1) \
                AND ($2::BOOLEAN IS NULL OR is_traveler = $2) \
            ORDER BY username;",
            USER_COLUMNS
        );
        let rows = conn.query(&stmt, &[&pattern, &is_traveler]).await?;
        Ok(rows.iter().map(parse_row_into_user).collect())
    }

    pub async fn search_listings(
        &self,
        search: Option<&str>,
    ) -> anyhow::Result<Vec<Listing>> {
        let conn = self.get_postgres_connection().await?;
        let pattern = search.map(|s| format!("%{}%", s));
        let stmt = format!(
            "SELECT {} FROM listings WHERE \
                ($1::TEXT IS NULL OR origin ILIKE $1 OR destination ILIKE $1 \
                    OR creator_id IN (SELECT id FROM users WHERE username ILIKE $1)) \
            ORDER BY created_at DESC;",
            LISTING_COLUMNS
        );
        let rows = conn.query(&stmt, &[&pattern]).await?;
        Ok(rows.iter().map(parse_row_into_listing).collect())
    }

    pub async fn search_requests(
        &self,
        status: Option<RequestStatus>,
        search: Option<&str>,
    ) -> anyhow::Result<Vec<TransportRequest>> {
        let conn = self.get_postgres_connection().await?;
        let pattern = search.map(|s| format!("%{}%", s));
        let status = status.map(|s| s.as_str());
        let stmt = format!(
            "SELECT {} FROM transport_requests WHERE \
                ($1::TEXT IS NULL OR status = $1) \
                AND ($2::TEXT IS NULL \
                    OR user_id IN (SELECT id FROM users WHERE username ILIKE $2) \
                    OR listing_id IN (SELECT id FROM listings WHERE origin ILIKE $2 OR destination ILIKE $2)) \
            ORDER BY created_at DESC;",
            REQUEST_COLUMNS
        );
        let rows = conn.query(&stmt, &[&status, &pattern]).await?;
        rows.iter().map(parse_row_into_transport_request).collect()
    }

    pub async fn accepted_payments(
        &self,
    ) -> anyhow::Result<Vec<PaymentRecord>> {
        let conn = self.get_postgres_connection().await?;
        let rows = conn
            .query(
                "SELECT r.id, r.listing_id, r.total_price, r.payment_link, r.accepted_at, \
                    u.username, u.email \
                FROM transport_requests r JOIN users u ON u.id = r.user_id \
                WHERE r.status = 'accepted' ORDER BY r.accepted_at DESC NULLS LAST;",
                &[],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| PaymentRecord {
                request_id: row.get("id"),
                listing_id: row.get("listing_id"),
                requester_username: row.get("username"),
                requester_email: row.get("email"),
                total_price: row.get("total_price"),
                payment_link: row.get("payment_link"),
                accepted_at: row.get("accepted_at"),
            })
            .collect())
    }
}

#[async_trait]
impl RequestStore for PostgresConnectionRepo {
    async fn pending_requests(
        &self,
        ids: &[i64],
    ) -> anyhow::Result<Vec<PendingRequest>> {
        let conn = self.get_postgres_connection().await?;
        let stmt = format!(
            "SELECT {} FROM transport_requests WHERE id = ANY($1) AND status = 'pending' ORDER BY id;",
            REQUEST_COLUMNS
        );
        let requests = conn
            .query(&stmt, &[&ids])
            .await?
            .iter()
            .map(parse_row_into_transport_request)
            .collect::<anyhow::Result<Vec<_>>>()?;
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let listing_ids: Vec<i64> = requests.iter().map(|r| r.listing_id).collect();
        let user_ids: Vec<i64> = requests.iter().map(|r| r.user_id).collect();

        let stmt = format!("SELECT {} FROM listings WHERE id = ANY($1);", LISTING_COLUMNS);
        let listings: HashMap<i64, Listing> = conn
            .query(&stmt, &[&listing_ids])
            .await?
            .iter()
            .map(|row| {
                let listing = parse_row_into_listing(row);
                (listing.id, listing)
            })
            .collect();

        let requesters: HashMap<i64, Requester> = conn
            .query(
                "SELECT id, email, first_name, last_name FROM users WHERE id = ANY($1);",
                &[&user_ids],
            )
            .await?
            .iter()
            .map(|row| {
                let requester = Requester {
                    id: row.get("id"),
                    email: row.get("email"),
                    first_name: row.get("first_name"),
                    last_name: row.get("last_name"),
                };
                (requester.id, requester)
            })
            .collect();

        requests
            .into_iter()
            .map(|request| {
                let listing = listings
                    .get(&request.listing_id)
                    .cloned()
                    .ok_or_else(|| anyhow!("Listing {} vanished for request {}", request.listing_id, request.id))?;
                let requester = requesters
                    .get(&request.user_id)
                    .cloned()
                    .ok_or_else(|| anyhow!("User {} vanished for request {}", request.user_id, request.id))?;
                Ok(PendingRequest {
                    request,
                    listing,
                    requester,
                })
            })
            .collect()
    }

    async fn price_tiers_for_listing(
        &self,
        listing_id: i64,
    ) -> anyhow::Result<Vec<PriceTier>> {
        let conn = self.get_postgres_connection().await?;
        let rows = conn
            .query(
                "SELECT p.* FROM price_tiers p \
                JOIN listing_price_tiers lp ON lp.price_tier_id = p.id \
                WHERE lp.listing_id = $1 ORDER BY p.min_weight NULLS FIRST, p.id;",
                &[&listing_id],
            )
            .await?;
        Ok(rows.iter().map(parse_row_into_price_tier).collect())
    }

    async fn accept_request(
        &self,
        request_id: i64,
        total_price: f64,
        payment_link: &str,
    ) -> anyhow::Result<bool> {
        let mut conn = self.get_postgres_connection().await?;
        let tx = conn.transaction().await?;
        let updated = tx
            .execute(
                "UPDATE transport_requests \
                SET status = 'accepted', total_price = $2, payment_link = $3, accepted_at = now() \
                WHERE id = $1 AND status = 'pending';",
                &[&request_id, &total_price, &payment_link],
            )
            .await
            .with_context(|| format!("Failed to accept request: {}", request_id))?;
        tx.commit().await?;
        Ok(updated == 1)
    }
}

async fn attach_tags(
    tx: &Transaction<'_>,
    listing_id: i64,
    tag_ids: &[i64],
) -> anyhow::Result<()> {
    for tag_id in tag_ids {
        tx.execute(
            "INSERT INTO listing_tags (listing_id, tag_id) VALUES ($1, $2);",
            &[&listing_id, tag_id],
        )
            .await
            .with_context(|| format!("Failed to attach tag: {} to listing: {}", tag_id, listing_id))?;
    }
    Ok(())
}

async fn attach_price_tiers(
    tx: &Transaction<'_>,
    listing_id: i64,
    price_tiers: &[NewPriceTier],
) -> anyhow::Result<()> {
    for tier in price_tiers {
        let row = tx
            .query_one(
                "INSERT INTO price_tiers (min_weight, max_weight, price) VALUES ($1, $2, $3) RETURNING id;",
                &[&tier.min_weight, &tier.max_weight, &tier.price],
            )
            .await?;
        let tier_id: i64 = row.get("id");
        tx.execute(
            "INSERT INTO listing_price_tiers (listing_id, price_tier_id) VALUES ($1, $2);",
            &[&listing_id, &tier_id],
        ).await?;
    }
    Ok(())
}

fn parse_row_into_user(
    row: &Row,
) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        phone_number: row.get("phone_number"),
        address: row.get("address"),
        date_of_birth: row.get("date_of_birth"),
        passport_number: row.get("passport_number"),
        is_traveler: row.get("is_traveler"),
        is_staff: row.get("is_staff"),
        is_active: row.get("is_active"),
        balance: row.get::<&str, f64>("balance"),
        date_joined: row.get("date_joined"),
        last_login: row.get("last_login"),
    }
}

fn parse_row_into_listing(
    row: &Row,
) -> Listing {
    Listing {
        id: row.get("id"),
        creator_id: row.get("creator_id"),
        origin: row.get("origin"),
        destination: row.get("destination"),
        max_weight: row.get::<&str, f64>("max_weight"),
        max_volume: row.get::<&str, i32>("max_volume"),
        departure_at: row.get("departure_at"),
        arrival_at: row.get("arrival_at"),
        is_completed: row.get("is_completed"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_row_into_transport_request(
    row: &Row,
) -> anyhow::Result<TransportRequest> {
    Ok(TransportRequest {
        id: row.get("id"),
        user_id: row.get("user_id"),
        listing_id: row.get("listing_id"),
        status: row.get::<&str, &str>("status").parse()?,
        weight: row.get("weight"),
        volume: row.get("volume"),
        total_price: row.get("total_price"),
        payment_link: row.get("payment_link"),
        created_at: row.get("created_at"),
        accepted_at: row.get("accepted_at"),
    })
}

fn parse_row_into_traveler_account_request(
    row: &Row,
) -> TravelerAccountRequest {
    TravelerAccountRequest {
        id: row.get("id"),
        user_id: row.get("user_id"),
        passport_number: row.get("passport_number"),
        address: row.get("address"),
        is_approved: row.get("is_approved"),
        created_at: row.get("created_at"),
    }
}

fn parse_row_into_tag(
    row: &Row,
) -> Tag {
    Tag {
        id: row.get("id"),
        name: row.get("name"),
    }
}

fn parse_row_into_price_tier(
    row: &Row,
) -> PriceTier {
    PriceTier {
        id: row.get("id"),
        min_weight: row.get("min_weight"),
        max_weight: row.get("max_weight"),
        price: row.get("price"),
    }
}

fn parse_row_into_listing_tag(
    row: &Row,
) -> ListingTag {
    ListingTag {
        id: row.get("id"),
        listing_id: row.get("listing_id"),
        tag: Tag {
            id: row.get("tag_id"),
            name: row.get("name"),
        },
    }
}

fn parse_row_into_listing_price_tier(
    row: &Row,
) -> ListingPriceTier {
    ListingPriceTier {
        id: row.get("join_id"),
        listing_id: row.get("listing_id"),
        price_tier: parse_row_into_price_tier(row),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::auth::new_token_key;

    async fn live_repo() -> PostgresConnectionRepo {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let manager = PostgresConnectionManager::new_from_stringlike(url, NoTls).unwrap();
        let pool = Pool::builder().max_size(2).build(manager).await.unwrap();
        let repo = PostgresConnectionRepo::new(pool);
        repo.bootstrap_schema().await.unwrap();
        repo
    }

    #[tokio::test]
    #[ignore = "Requires a postgres instance at TEST_DATABASE_URL"]
    async fn traveler_approval_mirrors_onto_user_flag() {
        let repo = live_repo().await;
        let suffix = new_token_key();
        let email = format!("{}@cargo.test", &suffix[..12]);
        let user = repo
            .create_user(&NewUser {
                username: format!("traveler_{}", &suffix[..12]),
                email: email.clone(),
                password_hash: "unused".to_string(),
                first_name: "Ana".to_string(),
                last_name: "B".to_string(),
            })
            .await
            .unwrap();
        assert!(!user.is_traveler);

        let application = repo
            .create_traveler_account_request(user.id, &TravelerAccountPayload {
                passport_number: Some("AB123456".to_string()),
                address: None,
            })
            .await
            .unwrap();

        let approved = repo.set_traveler_account_approval(application.id, true).await.unwrap().unwrap();
        assert!(approved.is_approved);
        assert!(repo.retrieve_user_by_email(&email).await.unwrap().unwrap().is_traveler);

        let cleared = repo.set_traveler_account_approval(application.id, false).await.unwrap().unwrap();
        assert!(!cleared.is_approved);
        assert!(!repo.retrieve_user_by_email(&email).await.unwrap().unwrap().is_traveler);

        assert!(repo.set_traveler_account_approval(-1, true).await.unwrap().is_none());
    }
}
