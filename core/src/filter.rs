use hub_api::Topic;

/// Decide whether a connection subscribed to `subscriber` receives an event
/// addressed to `target`.
///
/// Global events reach everyone; targeted events only reach connections on
/// exactly that topic.
pub fn matches(subscriber: &Topic, target: &Topic) -> bool {
    target.is_global() || subscriber == target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_event_reaches_every_subscriber() {
        let global = Topic::global();
        assert!(matches(&Topic::global(), &global));
        assert!(matches(&Topic::from("quiz1"), &global));
    }

    #[test]
    fn targeted_event_reaches_only_same_topic() {
        let target = Topic::from("quiz1");
        assert!(matches(&Topic::from("quiz1"), &target));
        assert!(!matches(&Topic::from("quiz2"), &target));
    }

    #[test]
    fn global_subscriber_skips_targeted_events() {
        assert!(!matches(&Topic::global(), &Topic::from("quiz1")));
    }
}
