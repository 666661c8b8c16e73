use std::collections::BTreeSet;
use std::sync::Arc;
use serde::Serialize;
use tracing::{error, info, warn};
use crate::repositories::RequestStore;
use crate::services::notification::{payment_confirmation_email, Notifier};
use crate::services::payment::PaymentGateway;
use crate::services::pricing::resolve_total_price;

#[derive(Debug, thiserror::Error)]
pub enum ConfirmationError {
    #[error("You are not authorized to confirm request {request_id}.")]
    PermissionDenied { request_id: i64 },
    #[error("No valid requests found.")]
    NoValidRequests,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingPrice,
    PaymentLinkFailed,
    NoLongerPending,
    StoreFailure,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SkippedRequest {
    pub request_id: i64,
    pub reason: SkipReason,
}

/// Per-item result of a confirmation batch. Skipped items stay pending.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfirmationOutcome {
    pub confirmed: Vec<i64>,
    pub skipped: Vec<SkippedRequest>,
}

impl ConfirmationOutcome {
    fn skip(&mut self, request_id: i64, reason: SkipReason) {
        self.skipped.push(SkippedRequest { request_id, reason });
    }
}

pub struct ConfirmationService {
    store: Arc<dyn RequestStore>,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl ConfirmationService {
    pub fn new(
        store: Arc<dyn RequestStore>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            payments,
            notifier,
        }
    }

    /// Confirms the caller's pending requests among `request_ids`.
    ///
    /// Ownership is checked for the whole batch before anything is written.
    /// Each item then commits on its own; a failed payment link leaves that
    /// item pending and the loop moves on.
    pub async fn confirm_requests(
        &self,
        actor_id: i64,
        request_ids: &[i64],
    ) -> Result<ConfirmationOutcome, ConfirmationError> {
        let ids: Vec<i64> = request_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let pending = if ids.is_empty() {
            Vec::new()
        } else {
            self.store.pending_requests(&ids).await?
        };

        if let Some(foreign) = pending.iter().find(|p| p.listing.creator_id != actor_id) {
            warn!(
                "User {} tried to confirm request {} on listing {} they do not own",
                actor_id, foreign.request.id, foreign.listing.id
            );
            return Err(ConfirmationError::PermissionDenied { request_id: foreign.request.id });
        }

        if pending.is_empty() {
            return Err(ConfirmationError::NoValidRequests);
        }

        let mut outcome = ConfirmationOutcome::default();
        for item in pending {
            let request_id = item.request.id;

            let tiers = if item.request.total_price.is_none() {
                match self.store.price_tiers_for_listing(item.listing.id).await {
                    Ok(tiers) => tiers,
                    Err(e) => {
                        error!("Failed to load price tiers for listing {}: {:#}", item.listing.id, e);
                        outcome.skip(request_id, SkipReason::StoreFailure);
                        continue;
                    }
                }
            } else {
                Vec::new()
            };

            let total_price = match resolve_total_price(item.request.total_price, item.request.weight, &tiers) {
                Some(price) if price > 0.0 => price,
                _ => {
                    warn!("Request {} has no chargeable price, leaving it pending", request_id);
                    outcome.skip(request_id, SkipReason::MissingPrice);
                    continue;
                }
            };

            let payment_link = match self.payments
                .create_payment_link(&item.requester.email, total_price, request_id)
                .await
            {
                Ok(link) => link,
                Err(e) => {
                    error!("Failed to create payment link for request {}: {:#}", request_id, e);
                    outcome.skip(request_id, SkipReason::PaymentLinkFailed);
                    continue;
                }
            };

            match self.store.accept_request(request_id, total_price, &payment_link).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Request {} was no longer pending when accepting it", request_id);
                    outcome.skip(request_id, SkipReason::NoLongerPending);
                    continue;
                }
                Err(e) => {
                    error!("Failed to accept request {}: {:#}", request_id, e);
                    outcome.skip(request_id, SkipReason::StoreFailure);
                    continue;
                }
            }

            let email = payment_confirmation_email(&item.requester, &item.listing, total_price, &payment_link);
            if let Err(e) = self.notifier.send(email) {
                error!("Request {} accepted but the confirmation email was not queued: {:#}", request_id, e);
            }

            info!("Request {} accepted by user {}", request_id, actor_id);
            outcome.confirmed.push(request_id);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use time::macros::datetime;
    use crate::models::listing::Listing;
    use crate::models::price_tier::PriceTier;
    use crate::models::transport_request::{PendingRequest, RequestStatus, Requester, TransportRequest};
    use crate::services::notification::OutboundEmail;

    const OWNER: i64 = 1;
    const OTHER_OWNER: i64 = 9;

    #[derive(Default)]
    struct MemoryStore {
        listings: HashMap<i64, Listing>,
        requests: Mutex<HashMap<i64, TransportRequest>>,
        tiers: HashMap<i64, Vec<PriceTier>>,
    }

    impl MemoryStore {
        fn with_listing(mut self, id: i64, creator_id: i64) -> Self {
            self.listings.insert(id, listing(id, creator_id));
            self
        }

        fn with_request(self, id: i64, listing_id: i64, total_price: Option<f64>, weight: Option<f64>) -> Self {
            self.requests.lock().unwrap().insert(id, TransportRequest {
                id,
                user_id: 100 + id,
                listing_id,
                status: RequestStatus::Pending,
                weight,
                volume: None,
                total_price,
                payment_link: None,
                created_at: datetime!(2030-01-01 00:00 UTC),
                accepted_at: None,
            });
            self
        }

        fn with_tiers(mut self, listing_id: i64, tiers: Vec<PriceTier>) -> Self {
            self.tiers.insert(listing_id, tiers);
            self
        }

        fn request(&self, id: i64) -> TransportRequest {
            self.requests.lock().unwrap()[&id].clone()
        }

        fn status(&self, id: i64) -> RequestStatus {
            self.request(id).status
        }
    }

    #[async_trait]
    impl RequestStore for MemoryStore {
        async fn pending_requests(&self, ids: &[i64]) -> anyhow::Result<Vec<PendingRequest>> {
            let requests = self.requests.lock().unwrap();
            let mut pending: Vec<PendingRequest> = ids
                .iter()
                .filter_map(|id| requests.get(id))
                .filter(|r| r.status == RequestStatus::Pending)
                .map(|r| PendingRequest {
                    request: r.clone(),
                    listing: self.listings[&r.listing_id].clone(),
                    requester: requester(r.user_id),
                })
                .collect();
            pending.sort_by_key(|p| p.request.id);
            Ok(pending)
        }

        async fn price_tiers_for_listing(&self, listing_id: i64) -> anyhow::Result<Vec<PriceTier>> {
            Ok(self.tiers.get(&listing_id).cloned().unwrap_or_default())
        }

        async fn accept_request(&self, request_id: i64, total_price: f64, payment_link: &str) -> anyhow::Result<bool> {
            let mut requests = self.requests.lock().unwrap();
            let request = requests.get_mut(&request_id).ok_or_else(|| anyhow!("missing request"))?;
            if request.status != RequestStatus::Pending {
                return Ok(false);
            }
            request.status = RequestStatus::Accepted;
            request.total_price = Some(total_price);
            request.payment_link = Some(payment_link.to_string());
            Ok(true)
        }
    }

    #[derive(Default)]
    struct FakeGateway {
        failing: HashSet<i64>,
        calls: Mutex<Vec<(i64, f64)>>,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_payment_link(&self, _email: &str, amount: f64, request_id: i64) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push((request_id, amount));
            if self.failing.contains(&request_id) {
                return Err(anyhow!("checkout provider unavailable"));
            }
            Ok(format!("https://pay.test/c/{}", request_id))
        }
    }

    /// Records each email with the request status observed at send time.
    struct RecordingNotifier {
        store: Arc<MemoryStore>,
        sent: Mutex<Vec<(OutboundEmail, Vec<RequestStatus>)>>,
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, email: OutboundEmail) -> anyhow::Result<()> {
            let statuses = self.store.requests.lock().unwrap().values().map(|r| r.status).collect();
            self.sent.lock().unwrap().push((email, statuses));
            Ok(())
        }
    }

    fn listing(id: i64, creator_id: i64) -> Listing {
        Listing {
            id,
            creator_id,
            origin: "Oran".to_string(),
            destination: "Lyon".to_string(),
            max_weight: 30.0,
            max_volume: 4,
            departure_at: datetime!(2030-02-01 09:00 UTC),
            arrival_at: datetime!(2030-02-01 13:00 UTC),
            is_completed: false,
            created_at: datetime!(2030-01-01 00:00 UTC),
            updated_at: datetime!(2030-01-01 00:00 UTC),
        }
    }

    fn requester(user_id: i64) -> Requester {
        Requester {
            id: user_id,
            email: format!("user{}@cargo.dz", user_id),
            first_name: "Sami".to_string(),
            last_name: "Haddad".to_string(),
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<FakeGateway>,
        notifier: Arc<RecordingNotifier>,
        service: ConfirmationService,
    }

    fn harness(store: MemoryStore, gateway: FakeGateway) -> Harness {
        let store = Arc::new(store);
        let gateway = Arc::new(gateway);
        let notifier = Arc::new(RecordingNotifier {
            store: store.clone(),
            sent: Mutex::new(Vec::new()),
        });
        let service = ConfirmationService::new(store.clone(), gateway.clone(), notifier.clone());
        Harness {
            store,
            gateway,
            notifier,
            service,
        }
    }

    #[tokio::test]
    async fn rejects_whole_batch_when_one_request_is_on_a_foreign_listing() {
        let store = MemoryStore::default()
            .with_listing(10, OWNER)
            .with_listing(20, OTHER_OWNER)
            .with_request(1, 10, Some(20.0), None)
            .with_request(2, 20, Some(30.0), None);
        let h = harness(store, FakeGateway::default());

        match h.service.confirm_requests(OWNER, &[1, 2]).await {
            Err(ConfirmationError::PermissionDenied { request_id: 2 }) => {}
            other => panic!("expected permission denied, got {other:?}"),
        }

        assert_eq!(h.store.status(1), RequestStatus::Pending);
        assert_eq!(h.store.status(2), RequestStatus::Pending);
        assert!(h.gateway.calls.lock().unwrap().is_empty());
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_or_unknown_ids_yield_no_valid_requests() {
        let store = MemoryStore::default()
            .with_listing(10, OWNER)
            .with_request(1, 10, Some(20.0), None);
        let h = harness(store, FakeGateway::default());

        assert!(matches!(
            h.service.confirm_requests(OWNER, &[]).await,
            Err(ConfirmationError::NoValidRequests)
        ));
        assert!(matches!(
            h.service.confirm_requests(OWNER, &[404, 405]).await,
            Err(ConfirmationError::NoValidRequests)
        ));
        assert_eq!(h.store.status(1), RequestStatus::Pending);
        assert!(h.gateway.calls.lock().unwrap().is_empty());
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepts_and_only_then_notifies_with_the_payment_link() {
        let store = MemoryStore::default()
            .with_listing(10, OWNER)
            .with_request(1, 10, Some(25.0), None);
        let h = harness(store, FakeGateway::default());

        let outcome = h.service.confirm_requests(OWNER, &[1]).await.unwrap();

        assert_eq!(outcome.confirmed, vec![1]);
        assert!(outcome.skipped.is_empty());
        let stored = h.store.request(1);
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert_eq!(stored.payment_link.as_deref(), Some("https://pay.test/c/1"));

        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (email, statuses_at_send) = &sent[0];
        assert_eq!(email.to, "user101@cargo.dz");
        assert!(email.body.contains("https://pay.test/c/1"));
        assert_eq!(statuses_at_send, &vec![RequestStatus::Accepted]);
    }

    #[tokio::test]
    async fn payment_failure_leaves_item_pending_and_continues() {
        let store = MemoryStore::default()
            .with_listing(10, OWNER)
            .with_request(1, 10, Some(20.0), None)
            .with_request(2, 10, Some(30.0), None)
            .with_request(3, 10, Some(40.0), None);
        let gateway = FakeGateway {
            failing: HashSet::from([2]),
            ..FakeGateway::default()
        };
        let h = harness(store, gateway);

        let outcome = h.service.confirm_requests(OWNER, &[1, 2, 3]).await.unwrap();

        assert_eq!(outcome.confirmed, vec![1, 3]);
        assert_eq!(outcome.skipped, vec![SkippedRequest { request_id: 2, reason: SkipReason::PaymentLinkFailed }]);
        assert_eq!(h.store.status(1), RequestStatus::Accepted);
        assert_eq!(h.store.status(2), RequestStatus::Pending);
        assert_eq!(h.store.status(3), RequestStatus::Accepted);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 2);
        assert_eq!(h.gateway.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn resubmitting_only_retries_items_still_pending() {
        let store = MemoryStore::default()
            .with_listing(10, OWNER)
            .with_request(1, 10, Some(20.0), None)
            .with_request(2, 10, Some(30.0), None);
        let gateway = FakeGateway {
            failing: HashSet::from([2]),
            ..FakeGateway::default()
        };
        let h = harness(store, gateway);

        h.service.confirm_requests(OWNER, &[1, 2]).await.unwrap();
        let retry = h.service.confirm_requests(OWNER, &[1, 2, 2]).await.unwrap();

        assert!(retry.confirmed.is_empty());
        assert_eq!(retry.skipped.len(), 1);
        let calls = h.gateway.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|(id, _)| *id == 1).count(), 1);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_listing_tiers_when_no_price_is_stored() {
        let store = MemoryStore::default()
            .with_listing(10, OWNER)
            .with_request(1, 10, None, Some(6.0))
            .with_request(2, 10, None, None)
            .with_tiers(10, vec![
                PriceTier { id: 1, min_weight: Some(0.0), max_weight: Some(5.0), price: Some(20.0) },
                PriceTier { id: 2, min_weight: Some(5.0), max_weight: Some(10.0), price: Some(45.0) },
            ]);
        let h = harness(store, FakeGateway::default());

        let outcome = h.service.confirm_requests(OWNER, &[1, 2]).await.unwrap();

        assert_eq!(outcome.confirmed, vec![1]);
        assert_eq!(outcome.skipped, vec![SkippedRequest { request_id: 2, reason: SkipReason::MissingPrice }]);
        assert_eq!(h.store.request(1).total_price, Some(45.0));
        assert_eq!(h.gateway.calls.lock().unwrap()[0], (1, 45.0));
        assert_eq!(h.store.status(2), RequestStatus::Pending);
    }
}
