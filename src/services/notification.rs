use std::thread;
use std::time::Duration;
use anyhow::{anyhow, Context};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use crate::config::Config;
use crate::models::listing::Listing;
use crate::models::transport_request::Requester;

/// Plain-text transactional email.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Notifier: Send + Sync {
    fn send(&self, email: OutboundEmail) -> anyhow::Result<()>;
}

pub fn payment_confirmation_email(
    requester: &Requester,
    listing: &Listing,
    total_price: f64,
    payment_link: &str,
) -> OutboundEmail {
    let body = format!(
        "Hello {first} {last},\n\n\
        Your transport request for {route} has been accepted.\n\
        Departure: {departure}\n\
        Total price: {total:.2}\n\n\
        Complete your payment here: {link}\n\n\
        (c) {year} Traveler Cargo",
        first = requester.first_name,
        last = requester.last_name,
        route = listing.route(),
        departure = listing.departure_at.date(),
        total = total_price,
        link = payment_link,
        year = OffsetDateTime::now_utc().year(),
    );

    OutboundEmail {
        to: requester.email.clone(),
        subject: "Payment Confirmation".to_string(),
        body,
    }
}

pub fn password_reset_email(
    email: &str,
    first_name: &str,
    reset_link: &str,
) -> OutboundEmail {
    OutboundEmail {
        to: email.to_string(),
        subject: "Password Reset Request".to_string(),
        body: format!(
            "Hello {},\n\nUse the link below to choose a new password. It expires in 24 hours.\n\n{}\n\n\
            If you did not ask for this, you can ignore this email.",
            first_name, reset_link
        ),
    }
}

#[derive(Serialize)]
struct EmailApiPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[derive(Clone)]
struct EmailApi {
    url: String,
    api_key: String,
    from: String,
}

/// Queue of outgoing emails drained by a pool of delivery threads.
pub struct EmailOutbox {
    sender: Sender<OutboundEmail>,
}

impl EmailOutbox {
    pub fn start(config: &Config) -> anyhow::Result<Self> {
        let (sender, receiver) = bounded::<OutboundEmail>(config.email_queue_capacity);
        let api = EmailApi {
            url: config.email_api_url.clone(),
            api_key: config.email_api_key.clone(),
            from: config.default_from_email.clone(),
        };

        let workers = num_cpus::get().max(1);
        for worker_id in 0..workers {
            let receiver = receiver.clone();
            let api = api.clone();
            thread::Builder::new()
                .name(format!("email-worker-{}", worker_id))
                .spawn(move || run_delivery_worker(worker_id, receiver, api))
                .context("Failed to spawn email delivery worker")?;
        }
        info!("Started {} email delivery workers", workers);

        Ok(Self { sender })
    }
}

impl Notifier for EmailOutbox {
    fn send(&self, email: OutboundEmail) -> anyhow::Result<()> {
        match self.sender.try_send(email) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(email)) => Err(anyhow!("Email queue is full, dropping mail to {}", email.to)),
            Err(TrySendError::Disconnected(email)) => {
                Err(anyhow!("Email workers are gone, dropping mail to {}", email.to))
            }
        }
    }
}

fn run_delivery_worker(
    worker_id: usize,
    receiver: Receiver<OutboundEmail>,
    api: EmailApi,
) {
    let client = match reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Email worker {} could not build an http client: {}", worker_id, e);
            return;
        }
    };

    for email in receiver.iter() {
        let payload = EmailApiPayload {
            from: &api.from,
            to: &email.to,
            subject: &email.subject,
            text: &email.body,
        };

        let res = client
            .post(&api.url)
            .bearer_auth(&api.api_key)
            .json(&payload)
            .send();

        match res {
            Ok(response) if response.status().is_success() => {
                info!("Delivered '{}' email to {}", email.subject, email.to);
            }
            Ok(response) => {
                warn!(
                    "Email API rejected '{}' mail to {} with status {}",
                    email.subject,
                    email.to,
                    response.status()
                );
            }
            Err(e) => {
                warn!("Failed to deliver '{}' mail to {} due to: {}", email.subject, email.to, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn listing() -> Listing {
        Listing {
            id: 7,
            creator_id: 1,
            origin: "Algiers".to_string(),
            destination: "Paris".to_string(),
            max_weight: 20.0,
            max_volume: 3,
            departure_at: datetime!(2030-01-10 08:00 UTC),
            arrival_at: datetime!(2030-01-10 12:00 UTC),
            is_completed: false,
            created_at: datetime!(2029-12-01 08:00 UTC),
            updated_at: datetime!(2029-12-01 08:00 UTC),
        }
    }

    #[test]
    fn payment_confirmation_mentions_route_price_and_link() {
        let requester = Requester {
            id: 2,
            email: "ana@cargo.dz".to_string(),
            first_name: "Ana".to_string(),
            last_name: "Belkacem".to_string(),
        };
        let email = payment_confirmation_email(&requester, &listing(), 45.5, "https://pay.test/c/1");

        assert_eq!(email.to, "ana@cargo.dz");
        assert_eq!(email.subject, "Payment Confirmation");
        assert!(email.body.contains("Algiers -> Paris"));
        assert!(email.body.contains("45.50"));
        assert!(email.body.contains("https://pay.test/c/1"));
    }

    #[test]
    fn full_queue_reports_an_error() {
        let (sender, _receiver) = bounded::<OutboundEmail>(1);
        let outbox = EmailOutbox { sender };
        let email = password_reset_email("ana@cargo.dz", "Ana", "http://front/reset");

        assert!(outbox.send(email.clone()).is_ok());
        assert!(outbox.send(email).is_err());
    }
}
