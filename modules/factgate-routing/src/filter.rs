//! Interest filter: the single chokepoint deciding which facts a consumer sees.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use factgate_common::{ConformityViolation, Fact, FactKind};

/// Free-standing form of the filter rule, without violation accounting.
///
/// True iff the fact carries a non-blank type name exactly equal to one of
/// `interested`.
pub fn is_of_interest(fact: &Fact, interested: &HashSet<String>) -> bool {
    fact.type_name()
        .is_some_and(|name| interested.contains(name))
}

/// Accepts facts whose type name is one of a configured set.
///
/// Facts that cannot be interpreted are reported as conformity violations
/// and never accepted; the filter itself never fails.
#[derive(Debug)]
pub struct InterestFilter {
    interested: HashSet<String>,
    /// Accept every typed fact regardless of `interested`.
    any: bool,
    violations: AtomicU64,
}

impl InterestFilter {
    pub fn new<S: Into<String>>(types: impl IntoIterator<Item = S>) -> Self {
        Self {
            interested: types.into_iter().map(Into::into).collect(),
            any: false,
            violations: AtomicU64::new(0),
        }
    }

    /// Accepts every fact that carries a type. Untyped and undecodable
    /// facts are still reported and dropped.
    pub fn any() -> Self {
        Self {
            any: true,
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn for_kinds<K: FactKind>(kinds: &[K]) -> Self {
        Self::new(kinds.iter().map(|k| k.name()))
    }

    pub fn interested_types(&self) -> &HashSet<String> {
        &self.interested
    }

    pub fn is_of_interest(&self, fact: &Fact) -> bool {
        if fact.type_name().is_none() {
            self.report(
                ConformityViolation::UnidentifiedEventType,
                &format!("{} {} carries no type name", fact.kind_name(), fact.identified()),
            );
            return false;
        }
        self.any || is_of_interest(fact, &self.interested)
    }

    fn wants(&self, name: &str) -> bool {
        self.any || self.interested.contains(name)
    }

    /// Decode a wire payload and apply the filter.
    pub fn accept(&self, payload: &serde_json::Value) -> Option<Fact> {
        match Fact::from_payload(payload) {
            Ok(fact) => self.is_of_interest(&fact).then_some(fact),
            Err(e) => {
                let violation = match declared_type(payload) {
                    Some(name) if self.wants(name) => {
                        ConformityViolation::InvalidEventStructure
                    }
                    // Foreign types that fail to decode are someone else's concern.
                    Some(_) => return None,
                    None => ConformityViolation::UnidentifiedFact,
                };
                self.report(violation, &e.to_string());
                None
            }
        }
    }

    /// Number of conformity violations seen so far.
    pub fn conformity_violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    fn report(&self, violation: ConformityViolation, detail: &str) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        warn!(violation = violation.code(), detail, "Conformity violation, fact dropped");
    }
}

fn declared_type(payload: &serde_json::Value) -> Option<&str> {
    payload
        .pointer("/envelope/fact_type/name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use factgate_common::EventType;
    use serde_json::json;

    fn fact(name: &str) -> Fact {
        Fact::domain_event(EventType::new(name).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn exact_name_match_only() {
        let filter = InterestFilter::new(["SAMPLE_AGGREGATE_CREATED"]);
        assert!(filter.is_of_interest(&fact("SAMPLE_AGGREGATE_CREATED")));
        assert!(!filter.is_of_interest(&fact("sample_aggregate_created")));
        assert!(!filter.is_of_interest(&fact("SAMPLE_AGGREGATE_CREATED_V2")));

        let other = InterestFilter::new(["OTHER"]);
        assert!(!other.is_of_interest(&fact("SAMPLE_AGGREGATE_CREATED")));
        assert_eq!(filter.conformity_violations(), 0);
        assert_eq!(other.conformity_violations(), 0);
    }

    #[test]
    fn undecodable_payload_of_interest_is_a_structure_violation() {
        let filter = InterestFilter::new(["X"]);
        let payload = json!({"kind": "domain_event", "envelope": {"fact_type": {"name": "X"}}});
        assert!(filter.accept(&payload).is_none());
        assert_eq!(filter.conformity_violations(), 1);
    }

    #[test]
    fn undecodable_foreign_payload_is_ignored_quietly() {
        let filter = InterestFilter::new(["X"]);
        let payload = json!({"kind": "domain_event", "envelope": {"fact_type": {"name": "Y"}}});
        assert!(filter.accept(&payload).is_none());
        assert_eq!(filter.conformity_violations(), 0);
    }

    #[test]
    fn garbage_payload_is_an_unidentified_fact() {
        let filter = InterestFilter::new(["X"]);
        assert!(filter.accept(&json!("not a fact")).is_none());
        assert_eq!(filter.conformity_violations(), 1);
    }

    #[test]
    fn padded_type_name_does_not_match() {
        let filter = InterestFilter::new(["X"]);
        assert!(!filter.is_of_interest(&fact(" X")));
        assert_eq!(filter.conformity_violations(), 0);
    }

    #[test]
    fn any_accepts_typed_facts_and_still_reports_garbage() {
        let filter = InterestFilter::any();
        assert!(filter.is_of_interest(&fact("WHATEVER")));

        let payload = json!({"kind": "domain_event", "envelope": {"fact_type": {"name": "Y"}}});
        assert!(filter.accept(&payload).is_none());
        assert_eq!(filter.conformity_violations(), 1);
    }

    #[test]
    fn accepts_decoded_fact_of_interest() {
        let filter = InterestFilter::new(["X"]);
        let payload = fact("X").to_payload().unwrap();
        assert_eq!(filter.accept(&payload).unwrap().type_name(), Some("X"));
    }
}
