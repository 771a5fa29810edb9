use crate::connection::Connection;
use crate::error::Error;
use crate::message::Message;
use crate::topic::Filter;

/// Callback invoked for messages matching one subscription.
///
/// Receives the connection so a handler can publish replies or disconnect;
/// subscription changes belong in the session-level callbacks.
pub type MessageHandler<T> = Box<dyn FnMut(&mut Connection<T>, &Message)>;

/// Default bound on the number of live subscriptions.
pub const DEFAULT_SUBSCRIPTION_LIMIT: usize = 10;

struct Subscription<T> {
    filter_str: String,
    filter: Filter,
    handler: MessageHandler<T>,
}

/// The topic-filter dispatch table: exact filter string to handler,
/// scanned in registration order.
pub(crate) struct SubscriptionTable<T> {
    entries: Vec<Subscription<T>>,
    limit: usize,
}

impl<T> SubscriptionTable<T> {
    pub(crate) fn new(limit: usize) -> Self {
        SubscriptionTable {
            entries: Vec::new(),
            limit,
        }
    }

    /// Adds a subscription, replacing any earlier handler for the same
    /// filter string.
    pub(crate) fn register(
        &mut self,
        filter_str: &str,
        filter: Filter,
        handler: MessageHandler<T>,
    ) -> Result<(), Error> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.filter_str == filter_str)
        {
            entry.filter = filter;
            entry.handler = handler;
            return Ok(());
        }

        if self.entries.len() >= self.limit {
            return Err(Error::SubscriptionLimit(self.limit));
        }

        self.entries.push(Subscription {
            filter_str: filter_str.to_owned(),
            filter,
            handler,
        });
        Ok(())
    }

    /// Removes a subscription; absent filters are a no-op.
    pub(crate) fn unregister(&mut self, filter_str: &str) {
        self.entries.retain(|entry| entry.filter_str != filter_str);
    }

    /// Invokes every handler whose filter matches the message topic and
    /// returns the number of matches.
    pub(crate) fn dispatch(&mut self, conn: &mut Connection<T>, message: &Message) -> usize {
        let mut matches = 0;
        for entry in &mut self.entries {
            if entry.filter.matches(&message.topic) {
                (entry.handler)(conn, message);
                matches += 1;
            }
        }
        matches
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
