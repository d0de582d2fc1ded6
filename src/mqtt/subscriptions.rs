use std::collections::BTreeSet;

/// Requests needed to bring the broker subscriptions in line with the catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionPlan {
    pub subscribe: Vec<String>,
    pub unsubscribe: Vec<String>,
}

impl SubscriptionPlan {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Tracks which topics are subscribed on the current connection, and which
/// subscribe/unsubscribe requests are still waiting for the broker.
///
/// A topic only enters `subscribed` once the broker acknowledged it, and only
/// leaves it once an unsubscribe was acknowledged. In-flight topics are never
/// requested twice.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    subscribed: BTreeSet<String>,
    subscribing: BTreeSet<String>,
    unsubscribing: BTreeSet<String>,
}

impl SubscriptionTracker {
    pub fn subscribed(&self) -> impl Iterator<Item = &str> {
        self.subscribed.iter().map(String::as_str)
    }

    /// Computes the requests needed for `wanted` and marks them in flight.
    pub fn plan(&mut self, wanted: &BTreeSet<String>) -> SubscriptionPlan {
        let subscribe: Vec<String> = wanted
            .iter()
            .filter(|topic| {
                !self.subscribed.contains(*topic)
                    && !self.subscribing.contains(*topic)
                    && !self.unsubscribing.contains(*topic)
            })
            .cloned()
            .collect();

        self.subscribing.extend(subscribe.iter().cloned());

        SubscriptionPlan {
            subscribe,
            unsubscribe: self.plan_unsubscribes(wanted),
        }
    }

    /// Like [`plan`](Self::plan), but only releases topics nobody wants.
    pub fn plan_unsubscribes(&mut self, wanted: &BTreeSet<String>) -> Vec<String> {
        let unsubscribe: Vec<String> = self
            .subscribed
            .iter()
            .filter(|topic| !wanted.contains(*topic) && !self.unsubscribing.contains(*topic))
            .cloned()
            .collect();

        self.unsubscribing.extend(unsubscribe.iter().cloned());

        unsubscribe
    }

    pub fn subscribe_finished(&mut self, topic: &str, success: bool) {
        self.subscribing.remove(topic);

        if success {
            self.subscribed.insert(topic.to_string());
        }
    }

    pub fn unsubscribe_finished(&mut self, topic: &str, success: bool) {
        self.unsubscribing.remove(topic);

        if success {
            self.subscribed.remove(topic);
        }
    }

    /// Forgets everything. Used when a new MQTT session starts.
    pub fn reset(&mut self) {
        self.subscribed.clear();
        self.subscribing.clear();
        self.unsubscribing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn never_requests_a_topic_twice() {
        let mut tracker = SubscriptionTracker::default();
        let wanted = topics(&["a", "b"]);

        let plan = tracker.plan(&wanted);
        assert_eq!(plan.subscribe, vec!["a", "b"]);

        // still in flight
        assert!(tracker.plan(&wanted).is_empty());

        tracker.subscribe_finished("a", true);
        tracker.subscribe_finished("b", true);
        assert!(tracker.plan(&wanted).is_empty());
        assert_eq!(tracker.subscribed().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn failed_subscribe_is_retried_on_next_plan() {
        let mut tracker = SubscriptionTracker::default();
        let wanted = topics(&["a"]);

        tracker.plan(&wanted);
        tracker.subscribe_finished("a", false);
        assert!(!tracker.subscribed().any(|topic| topic == "a"));

        assert_eq!(tracker.plan(&wanted).subscribe, vec!["a"]);
    }

    #[test]
    fn releases_topics_no_longer_wanted() {
        let mut tracker = SubscriptionTracker::default();
        tracker.plan(&topics(&["t1"]));
        tracker.subscribe_finished("t1", true);

        let plan = tracker.plan(&topics(&["t2"]));
        assert_eq!(plan.subscribe, vec!["t2"]);
        assert_eq!(plan.unsubscribe, vec!["t1"]);

        tracker.subscribe_finished("t2", true);
        tracker.unsubscribe_finished("t1", true);

        assert_eq!(tracker.subscribed().collect::<Vec<_>>(), vec!["t2"]);
    }

    #[test]
    fn failed_unsubscribe_keeps_topic() {
        let mut tracker = SubscriptionTracker::default();
        tracker.plan(&topics(&["t1"]));
        tracker.subscribe_finished("t1", true);

        assert_eq!(tracker.plan_unsubscribes(&topics(&[])), vec!["t1"]);
        tracker.unsubscribe_finished("t1", false);

        assert!(tracker.subscribed().any(|topic| topic == "t1"));
        assert_eq!(tracker.plan_unsubscribes(&topics(&[])), vec!["t1"]);
    }

    #[test]
    fn topic_being_released_is_not_resubscribed_until_released() {
        let mut tracker = SubscriptionTracker::default();
        tracker.plan(&topics(&["t1"]));
        tracker.subscribe_finished("t1", true);
        tracker.plan(&topics(&[]));

        assert!(tracker.plan(&topics(&["t1"])).is_empty());

        tracker.unsubscribe_finished("t1", true);
        assert_eq!(tracker.plan(&topics(&["t1"])).subscribe, vec!["t1"]);
    }
}
