//! Fact envelope behaviour as seen by consumers of the kernel.

use factgate_common::date::{format_date, parse_date};
use factgate_common::fact::{COMMAND_TYPE, DOMAIN_EVENT_TYPE};
use factgate_common::{
    Attribute, Entity, EventType, Fact, FactKind, Identifier, KernelError, Versioned,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountEvent {
    Opened,
    Closed,
}

impl FactKind for AccountEvent {
    const ALL: &'static [Self] = &[AccountEvent::Opened, AccountEvent::Closed];

    fn name(&self) -> &'static str {
        match self {
            AccountEvent::Opened => "ACCOUNT_OPENED",
            AccountEvent::Closed => "ACCOUNT_CLOSED",
        }
    }
}

#[test]
fn closed_kind_sets_interpret_facts_exhaustively() {
    let fact = Fact::domain_event(AccountEvent::Closed.event_type())
        .build()
        .unwrap();

    let kind = fact.type_name().and_then(AccountEvent::parse);
    let summary = match kind {
        Some(AccountEvent::Opened) => "opened",
        Some(AccountEvent::Closed) => "closed",
        None => "foreign",
    };
    assert_eq!(summary, "closed");
}

#[test]
fn immutable_copy_is_equal_and_independent() {
    let original = Fact::command(EventType::new("OPEN_ACCOUNT").unwrap())
        .identified_by(
            Entity::from_identifiers([
                Identifier::new("tenant", "t-1").unwrap(),
                Identifier::new("account", "a-9").unwrap(),
            ])
            .unwrap(),
        )
        .specification(Attribute::new("owner", "ada").unwrap())
        .build()
        .unwrap();

    let copy = original.immutable().unwrap();
    assert_eq!(copy, original);

    let extended = copy
        .append_specification(Attribute::new("currency", "EUR").unwrap())
        .unwrap();
    assert_eq!(original.specification().len(), 1);
    assert_eq!(copy.specification().len(), 1);
    assert_eq!(extended.specification().len(), 2);
}

#[test]
fn duplicate_specification_keys_fail() {
    let result = Fact::domain_event(AccountEvent::Opened.event_type())
        .specification(Attribute::new("owner", "ada").unwrap())
        .specification(Attribute::new("owner", "bob").unwrap())
        .build();
    assert!(matches!(result, Err(KernelError::DuplicateAttribute(_))));
}

#[test]
fn date_attributes_use_the_shared_pattern() {
    let at = parse_date("2024-06-01T08:30:00.250+02:00").unwrap();
    let attribute = Attribute::new("opened_at", format_date(&at)).unwrap();
    assert_eq!(attribute.value(), "2024-06-01T06:30:00.250+00:00");
    assert_eq!(parse_date(attribute.value()).unwrap(), at);
}

#[test]
fn kinds_have_stable_distinct_versions() {
    assert_eq!(COMMAND_TYPE.version_hash(), COMMAND_TYPE.version_hash());
    assert_ne!(COMMAND_TYPE.version_hash(), DOMAIN_EVENT_TYPE.version_hash());
    assert_ne!(Identifier::version_hash(), Entity::version_hash());
}
