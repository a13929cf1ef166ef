// SPDX-License-Identifier: MIT OR Apache-2.0

//! Position of a message among the stored messages of a contact.
//!
//! Orders are floats. A new most (least) recent message gets the next integer above (below) the
//! current boundary, anything in between gets the mean of its two neighbours. Messages whose
//! sent-at can't be unwrapped are skipped as if they weren't there.
use bubbles_core::contact::MessageOrder;
use bubbles_core::ids::{ContactId, MessageId, Timestamp};
use bubbles_core::key_wrap::unwrap;
use bubbles_core::keys::ContactLocalKey;
use bubbles_store::MessageOrderRepository;
use tracing::warn;

use crate::context::{MessagingContext, MessagingStore};
use crate::error::MessagingError;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum OrderResult {
    Found(f64),

    /// A stored message with order `duplicated` was sent at the same time. `candidate` is a
    /// free order right after it.
    Duplicated { candidate: f64, duplicated: f64 },
}

impl OrderResult {
    /// Order to store the message with.
    pub fn order(&self) -> f64 {
        match self {
            OrderResult::Found(order) => *order,
            OrderResult::Duplicated { candidate, .. } => *candidate,
        }
    }
}

pub struct MessageOrderCalculator<'a, R> {
    repository: &'a R,
    key: &'a ContactLocalKey,
}

impl<'a, R> MessageOrderCalculator<'a, R>
where
    R: MessageOrderRepository,
{
    pub fn new(repository: &'a R, key: &'a ContactLocalKey) -> Self {
        Self { repository, key }
    }

    pub async fn order(
        &self,
        contact_id: &ContactId,
        sent_at: Timestamp,
    ) -> Result<OrderResult, R::Error> {
        let mut excluded = Excluded::default();

        let (most_recent, most_recent_sent_at) = loop {
            let Some(most_recent) = self
                .repository
                .most_recent(contact_id, &excluded.ids)
                .await?
            else {
                return Ok(OrderResult::Found(excluded.unique(0.0)));
            };
            match self.sent_at(&most_recent) {
                Some(most_recent_sent_at) => break (most_recent, most_recent_sent_at),
                None => excluded.push(&most_recent),
            }
        };

        if sent_at > most_recent_sent_at {
            let order = excluded.max_order().map_or(most_recent.order, |max_excluded| {
                max_excluded.max(most_recent.order)
            });
            return Ok(OrderResult::Found((order + 1.0).floor()));
        }

        let least_recent_order = self
            .repository
            .least_recent(contact_id, &excluded.ids)
            .await?
            .map_or(most_recent.order, |message| message.order);

        self.binary_search(
            contact_id,
            sent_at,
            (most_recent.order, least_recent_order),
            excluded,
        )
        .await
    }

    async fn binary_search(
        &self,
        contact_id: &ContactId,
        sent_at: Timestamp,
        (most_recent_order, least_recent_order): (f64, f64),
        mut excluded: Excluded,
    ) -> Result<OrderResult, R::Error> {
        let count = self.repository.count(contact_id, &excluded.ids).await?;
        // Positions are counted from the most recent message, lower positions mean higher orders.
        let mut start: isize = 0;
        let mut last: isize = count as isize - 1;
        let mut end = last;
        let mut next = (most_recent_order + 1.0).floor();
        let mut previous = (least_recent_order - 1.0).ceil();

        while start <= end {
            let mid = start + (end - start) / 2;
            let Some(mid_message) = self
                .repository
                .at(contact_id, mid as usize, &excluded.ids)
                .await?
            else {
                break;
            };

            let Some(mid_sent_at) = self.sent_at(&mid_message) else {
                // Every later position moves up by one once the message is excluded.
                excluded.push(&mid_message);
                last -= 1;
                end -= 1;
                continue;
            };

            if mid_sent_at == sent_at {
                let candidate = if mid == 0 {
                    (mid_message.order + 1.0).floor()
                } else if mid == last {
                    (mid_message.order - 1.0).ceil()
                } else {
                    let newer = self
                        .repository
                        .at(contact_id, mid as usize - 1, &excluded.ids)
                        .await?
                        .map_or(next, |message| message.order);
                    (newer + mid_message.order) / 2.0
                };
                return Ok(OrderResult::Duplicated {
                    candidate,
                    duplicated: mid_message.order,
                });
            }

            if sent_at < mid_sent_at {
                start = mid + 1;
                next = mid_message.order;
            } else {
                end = mid - 1;
                previous = mid_message.order;
            }
        }

        let order = if next == least_recent_order {
            (least_recent_order - 1.0).ceil()
        } else {
            (next + previous) / 2.0
        };
        Ok(OrderResult::Found(excluded.unique(order)))
    }

    fn sent_at(&self, message: &MessageOrder) -> Option<Timestamp> {
        match unwrap(&message.enc_sent_at, self.key) {
            Ok(sent_at) => Some(sent_at),
            Err(err) => {
                warn!(message = %message.id, %err, "skipping message with unreadable sent-at");
                None
            }
        }
    }
}

/// Messages left out of the search because their sent-at is unreadable.
#[derive(Default)]
struct Excluded {
    ids: Vec<MessageId>,
    orders: Vec<f64>,
}

impl Excluded {
    fn push(&mut self, message: &MessageOrder) {
        self.ids.push(message.id);
        self.orders.push(message.order);
    }

    fn max_order(&self) -> Option<f64> {
        self.orders.iter().copied().reduce(f64::max)
    }

    /// Moves `order` off the order of an excluded message.
    fn unique(&self, order: f64) -> f64 {
        if self.orders.contains(&order) {
            order + 0.01
        } else {
            order
        }
    }
}

impl<S> MessagingContext<S>
where
    S: MessagingStore,
{
    /// Order for a new message of the contact sent at `sent_at`.
    pub async fn message_order(
        &self,
        contact_id: &ContactId,
        sent_at: Timestamp,
    ) -> Result<OrderResult, MessagingError> {
        let key = self.contact_key(contact_id).await?;
        MessageOrderCalculator::new(&self.store, &key)
            .order(contact_id, sent_at)
            .await
            .map_err(MessagingError::store)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bubbles_core::codec::MessageCodec;
    use bubbles_core::contact::{MessageDirection, SafeMessage};
    use bubbles_core::crypto::Rng;
    use bubbles_core::ids::{ContactId, MessageId, Timestamp};
    use bubbles_core::keys::ContactLocalKey;
    use bubbles_store::{MemoryStore, MessageStore};

    use super::{MessageOrderCalculator, OrderResult};

    struct Setup {
        rng: Rng,
        store: MemoryStore,
        key: ContactLocalKey,
        contact_id: ContactId,
    }

    impl Setup {
        fn new() -> Self {
            let rng = Rng::from_seed([1; 32]);
            let key = ContactLocalKey::generate(&rng).unwrap();
            let contact_id = ContactId::random(&rng).unwrap();
            Self {
                rng,
                store: MemoryStore::new(),
                key,
                contact_id,
            }
        }

        async fn add(&self, order: f64, sent_at: u64, key: &ContactLocalKey) {
            let message = SafeMessage {
                id: MessageId::random(&self.rng).unwrap(),
                contact_id: self.contact_id,
                fields: MessageCodec::encrypt(
                    "hello",
                    Timestamp::from_millis(sent_at),
                    None,
                    None,
                    key,
                    &self.rng,
                )
                .unwrap(),
                direction: MessageDirection::Received,
                is_read: false,
                order,
            };
            self.store.save_message(message).await.unwrap();
        }

        /// Five messages with orders 0 to 4, sent at 1s to 5s.
        async fn five_messages() -> Self {
            let setup = Self::new();
            for i in 0..5u64 {
                setup.add(i as f64, (i + 1) * 1000, &setup.key).await;
            }
            setup
        }

        async fn order(&self, sent_at: u64) -> OrderResult {
            MessageOrderCalculator::new(&self.store, &self.key)
                .order(&self.contact_id, Timestamp::from_millis(sent_at))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn first_message() {
        let setup = Setup::new();
        assert_eq!(setup.order(1000).await, OrderResult::Found(0.0));
    }

    #[tokio::test]
    async fn most_and_least_recent() {
        let setup = Setup::five_messages().await;
        assert_eq!(setup.order(u64::MAX).await, OrderResult::Found(5.0));
        assert_eq!(setup.order(0).await, OrderResult::Found(-1.0));
    }

    #[tokio::test]
    async fn duplicated_sent_at() {
        let setup = Setup::five_messages().await;

        for i in 0..5u64 {
            let duplicated = i as f64;
            let candidate = match i {
                4 => duplicated + 1.0,
                0 => duplicated - 1.0,
                _ => duplicated + 0.5,
            };
            assert_eq!(
                setup.order((i + 1) * 1000).await,
                OrderResult::Duplicated {
                    candidate,
                    duplicated
                },
                "message {i}"
            );
        }
    }

    #[tokio::test]
    async fn insert_everywhere() {
        let setup = Setup::five_messages().await;

        for i in 0..5u64 {
            let sent_at = (i + 1) * 1000;
            let after = if i == 4 { 5.0 } else { i as f64 + 0.5 };
            let before = if i == 0 { -1.0 } else { i as f64 - 0.5 };

            assert_eq!(setup.order(sent_at + 1).await, OrderResult::Found(after), "after {i}");
            assert_eq!(setup.order(sent_at - 1).await, OrderResult::Found(before), "before {i}");
        }
    }

    #[tokio::test]
    async fn new_boundaries_are_integers() {
        let setup = Setup::new();
        setup.add(1.3, 10_000, &setup.key).await;

        assert_eq!(setup.order(5000).await, OrderResult::Found(1.0));
        assert_eq!(setup.order(15_000).await, OrderResult::Found(2.0));
    }

    #[tokio::test]
    async fn unreadable_messages_are_skipped() {
        let setup = Setup::five_messages().await;
        let other_key = ContactLocalKey::generate(&setup.rng).unwrap();

        // Unreadable most recent message.
        setup.add(5.0, 6000, &other_key).await;
        assert_eq!(setup.order(7000).await, OrderResult::Found(6.0));
        assert_eq!(setup.order(4500).await, OrderResult::Found(3.5));

        // Unreadable message in the middle of the search.
        setup.add(2.5, 3500, &other_key).await;
        assert_matches!(
            setup.order(3200).await,
            OrderResult::Found(order) if order > 2.0 && order < 3.0
        );
        assert_eq!(setup.order(1500).await, OrderResult::Found(0.5));
    }

    #[test]
    fn duplicated_uses_candidate() {
        let result = OrderResult::Duplicated {
            candidate: 2.5,
            duplicated: 2.0,
        };
        assert_eq!(result.order(), 2.5);
    }
}
