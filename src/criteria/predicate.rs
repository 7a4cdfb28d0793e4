//! Composable boolean filters over temporal entity metadata.

use crate::entity::TemporalEntity;
use crate::types::{InternalId, Timestamp};
use std::collections::BTreeSet;

/// A filter expression evaluated against an entity's version metadata and
/// natural-id fields.
///
/// Built by the criteria builder and ANDed by consumers into their own
/// queries. Evaluation is a pure function of the entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// Matches everything.
    All,
    /// Flattened path equals.
    PathEq(String),
    StartLte(Timestamp),
    StartLt(Timestamp),
    EndUnset,
    EndGt(Timestamp),
    /// Internal id is absent from the set. Entities without an id match.
    InternalIdNotIn(BTreeSet<InternalId>),
    /// Natural-id field has one of the values.
    FieldIn {
        field: String,
        values: BTreeSet<String>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn path_eq(flat_path: impl Into<String>) -> Self {
        Predicate::PathEq(flat_path.into())
    }

    pub fn field_in<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::FieldIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Still current, or ended after `timepoint`.
    pub fn live_at(timepoint: Timestamp) -> Self {
        Predicate::Or(vec![Predicate::EndUnset, Predicate::EndGt(timepoint)])
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::All => other,
            Predicate::And(mut clauses) => {
                clauses.push(other);
                Predicate::And(clauses)
            }
            this => Predicate::And(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn matches<E: TemporalEntity + ?Sized>(&self, entity: &E) -> bool {
        match self {
            Predicate::All => true,
            Predicate::PathEq(flat_path) => entity.path() == flat_path,
            Predicate::StartLte(t) => entity.start() <= *t,
            Predicate::StartLt(t) => entity.start() < *t,
            Predicate::EndUnset => entity.end().is_none(),
            Predicate::EndGt(t) => entity.end().map_or(false, |end| end > *t),
            Predicate::InternalIdNotIn(ids) => entity
                .internal_id()
                .map_or(true, |id| !ids.contains(&id)),
            Predicate::FieldIn { field, values } => entity
                .field_value(field)
                .map_or(false, |value| values.contains(value)),
            Predicate::And(clauses) => clauses.iter().all(|c| c.matches(entity)),
            Predicate::Or(clauses) => clauses.iter().any(|c| c.matches(entity)),
            Predicate::Not(inner) => !inner.matches(entity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityMeta, BUSINESS_ID_FIELD};

    struct Doc {
        meta: EntityMeta,
        id: String,
    }

    impl TemporalEntity for Doc {
        fn meta(&self) -> &EntityMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.meta
        }

        fn business_id(&self) -> Option<&str> {
            Some(&self.id)
        }
    }

    fn doc(path: &str, start: i64, end: Option<i64>) -> Doc {
        Doc {
            meta: EntityMeta {
                internal_id: Some(InternalId::generate()),
                path: path.into(),
                start: Timestamp(start),
                end: end.map(Timestamp),
            },
            id: "100".into(),
        }
    }

    #[test]
    fn test_time_bounds() {
        let current = doc("MAIN", 10, None);
        let ended = doc("MAIN", 10, Some(20));

        assert!(Predicate::StartLte(Timestamp(10)).matches(&current));
        assert!(!Predicate::StartLt(Timestamp(10)).matches(&current));
        assert!(Predicate::EndUnset.matches(&current));
        assert!(!Predicate::EndUnset.matches(&ended));

        assert!(Predicate::live_at(Timestamp(19)).matches(&ended));
        assert!(!Predicate::live_at(Timestamp(20)).matches(&ended));
        assert!(Predicate::live_at(Timestamp(20)).matches(&current));
    }

    #[test]
    fn test_id_and_field_filters() {
        let d = doc("MAIN_A", 1, None);
        let id = d.internal_id().unwrap();

        assert!(Predicate::InternalIdNotIn(BTreeSet::new()).matches(&d));
        assert!(!Predicate::InternalIdNotIn([id].into_iter().collect()).matches(&d));

        assert!(Predicate::field_in(BUSINESS_ID_FIELD, ["100", "200"]).matches(&d));
        assert!(!Predicate::field_in(BUSINESS_ID_FIELD, ["200"]).matches(&d));
        assert!(!Predicate::field_in("moduleId", ["100"]).matches(&d));
    }

    #[test]
    fn test_composition() {
        let d = doc("MAIN_A", 5, None);

        let on_a = Predicate::path_eq("MAIN_A").and(Predicate::StartLte(Timestamp(5)));
        assert!(on_a.matches(&d));
        assert!(!on_a.clone().not().matches(&d));
        assert!(!Predicate::path_eq("MAIN").and(Predicate::All).matches(&d));

        assert_eq!(Predicate::All.and(Predicate::EndUnset), Predicate::EndUnset);
        assert!(!Predicate::Or(vec![]).matches(&d));
        assert!(Predicate::And(vec![]).matches(&d));
    }
}
