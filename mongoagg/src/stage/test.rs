use crate::{
    deps::{DepsStatus, DepsTracker},
    stage::{
        AccumulatorExpr, AccumulatorFunction, GroupStage, LookupStage, MatchStage, OutStage,
        ProjectItem, ProjectStage, SortDirection, SortStage, Stage, UnwindStage,
    },
};
use bson::{doc, Bson};
use mongoagg_datastructures::UniqueLinkedHashMap;

pub(crate) fn match_stage(predicate: bson::Document) -> Stage {
    Stage::Match(MatchStage { predicate })
}

pub(crate) fn sort_stage(keys: &[(&str, i32)]) -> Stage {
    let mut key_spec = UniqueLinkedHashMap::new();
    for (field, direction) in keys {
        let direction = if *direction >= 0 {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        };
        key_spec.insert(field.to_string(), direction).unwrap();
    }
    Stage::Sort(SortStage::new(key_spec))
}

pub(crate) fn sort_stage_with_limit(keys: &[(&str, i32)], limit: i64) -> Stage {
    match sort_stage(keys) {
        Stage::Sort(mut sort) => {
            sort.limit = Some(limit);
            Stage::Sort(sort)
        }
        _ => unreachable!(),
    }
}

pub(crate) fn project_stage(items: &[(&str, ProjectItem)]) -> Stage {
    let mut map = UniqueLinkedHashMap::new();
    for (field, item) in items {
        map.insert(field.to_string(), item.clone()).unwrap();
    }
    Stage::Project(ProjectStage { items: map })
}

pub(crate) fn inclusion_project(fields: &[&str]) -> Stage {
    let items: Vec<(&str, ProjectItem)> =
        fields.iter().map(|f| (*f, ProjectItem::Inclusion)).collect();
    project_stage(&items)
}

pub(crate) fn unwind_stage(path: &str) -> Stage {
    Stage::Unwind(UnwindStage {
        path: path.to_string(),
    })
}

pub(crate) fn group_stage(id: Bson, accumulators: &[(&str, AccumulatorFunction, Bson)]) -> Stage {
    let mut map = UniqueLinkedHashMap::new();
    for (field, function, arg) in accumulators {
        map.insert(
            field.to_string(),
            AccumulatorExpr {
                function: *function,
                arg: arg.clone(),
            },
        )
        .unwrap();
    }
    Stage::Group(GroupStage {
        id,
        accumulators: map,
        doing_merge: false,
    })
}

mod coalesce {
    use super::*;

    macro_rules! test_coalesce {
        ($func_name:ident, absorbed = $absorbed:expr, expected = $expected:expr, left = $left:expr, right = $right:expr,) => {
            #[test]
            fn $func_name() {
                let mut left = $left;
                let right = $right;
                assert_eq!($absorbed, left.coalesce(&right));
                assert_eq!($expected, left);
            }
        };
    }

    test_coalesce!(
        limit_keeps_minimum,
        absorbed = true,
        expected = Stage::Limit(3),
        left = Stage::Limit(7),
        right = Stage::Limit(3),
    );

    test_coalesce!(
        skip_sums,
        absorbed = true,
        expected = Stage::Skip(9),
        left = Stage::Skip(4),
        right = Stage::Skip(5),
    );

    test_coalesce!(
        sort_absorbs_limit,
        absorbed = true,
        expected = sort_stage_with_limit(&[("x", 1)], 5),
        left = sort_stage(&[("x", 1)]),
        right = Stage::Limit(5),
    );

    test_coalesce!(
        sort_keeps_tighter_limit,
        absorbed = true,
        expected = sort_stage_with_limit(&[("x", 1)], 2),
        left = sort_stage_with_limit(&[("x", 1)], 2),
        right = Stage::Limit(6),
    );

    test_coalesce!(
        matches_conjoin,
        absorbed = true,
        expected = match_stage(doc! { "$and": [ { "a": 1 }, { "b": 2 } ] }),
        left = match_stage(doc! { "a": 1 }),
        right = match_stage(doc! { "b": 2 }),
    );

    test_coalesce!(
        text_match_not_absorbed,
        absorbed = false,
        expected = match_stage(doc! { "a": 1 }),
        left = match_stage(doc! { "a": 1 }),
        right = match_stage(doc! { "$text": { "$search": "foo" } }),
    );

    test_coalesce!(
        limit_does_not_absorb_skip,
        absorbed = false,
        expected = Stage::Limit(3),
        left = Stage::Limit(3),
        right = Stage::Skip(2),
    );
}

mod optimize {
    use super::*;

    #[test]
    fn zero_skip_is_dropped() {
        assert_eq!(None, Stage::Skip(0).optimize());
    }

    #[test]
    fn empty_match_is_dropped() {
        assert_eq!(None, match_stage(doc! {}).optimize());
    }

    #[test]
    fn other_stages_survive() {
        assert_eq!(Some(Stage::Limit(4)), Stage::Limit(4).optimize());
        let m = match_stage(doc! { "a": 1 });
        assert_eq!(Some(m.clone()), m.optimize());
    }
}

mod dependencies {
    use super::*;

    fn deps_of(stage: &Stage) -> (DepsTracker, DepsStatus) {
        let mut deps = DepsTracker::default();
        let status = stage.dependencies(&mut deps);
        (deps, status)
    }

    #[test]
    fn match_reports_fields_see_next() {
        let (deps, status) = deps_of(&match_stage(doc! { "a": 1, "b.c": { "$gt": 2 } }));
        assert_eq!(DepsStatus::SEE_NEXT, status);
        let fields: Vec<_> = deps.fields.iter().cloned().collect();
        assert_eq!(vec!["a", "b.c"], fields);
    }

    #[test]
    fn inclusion_project_is_exhaustive() {
        let (deps, status) = deps_of(&inclusion_project(&["x", "y"]));
        assert_eq!(DepsStatus::EXHAUSTIVE_FIELDS, status);
        assert!(deps.fields.contains("_id"));
        assert!(deps.fields.contains("x"));
        assert!(deps.fields.contains("y"));
        assert!(!deps.need_whole_document);
    }

    #[test]
    fn exclusion_project_needs_whole_document() {
        let (deps, status) = deps_of(&project_stage(&[("secret", ProjectItem::Exclusion)]));
        assert_eq!(DepsStatus::EXHAUSTIVE_FIELDS, status);
        assert!(deps.need_whole_document);
    }

    #[test]
    fn group_is_exhaustive_for_fields_and_meta() {
        let stage = group_stage(
            Bson::String("$dept".to_string()),
            &[(
                "total",
                AccumulatorFunction::Sum,
                Bson::String("$qty".to_string()),
            )],
        );
        let (deps, status) = deps_of(&stage);
        assert_eq!(DepsStatus::EXHAUSTIVE_ALL, status);
        let fields: Vec<_> = deps.fields.iter().cloned().collect();
        assert_eq!(vec!["dept", "qty"], fields);
    }

    #[test]
    fn redact_is_opaque() {
        let stage = Stage::Redact(crate::stage::RedactStage {
            expr: Bson::String("$$PRUNE".to_string()),
        });
        let (_, status) = deps_of(&stage);
        assert_eq!(DepsStatus::NOT_SUPPORTED, status);
    }

    #[test]
    fn unwind_needs_its_path() {
        let (deps, status) = deps_of(&unwind_stage("tags"));
        assert_eq!(DepsStatus::SEE_NEXT, status);
        assert!(deps.fields.contains("tags"));
    }
}

mod sharded {
    use super::*;

    #[test]
    fn limit_runs_on_both_halves() {
        let (shard, merger) = Stage::Limit(5).split_for_sharded();
        assert_eq!(Some(Stage::Limit(5)), shard);
        assert_eq!(Some(Stage::Limit(5)), merger);
    }

    #[test]
    fn skip_runs_only_on_merger() {
        let (shard, merger) = Stage::Skip(3).split_for_sharded();
        assert_eq!(None, shard);
        assert_eq!(Some(Stage::Skip(3)), merger);
    }

    #[test]
    fn sort_merger_half_is_merging() {
        let (shard, merger) = sort_stage_with_limit(&[("x", 1)], 4).split_for_sharded();
        assert_eq!(Some(sort_stage_with_limit(&[("x", 1)], 4)), shard);
        match merger {
            Some(Stage::Sort(sort)) => {
                assert!(sort.merging);
                assert_eq!(Some(4), sort.limit);
            }
            other => panic!("expected merging sort, got {:?}", other),
        }
    }

    #[test]
    fn out_and_lookup_pin_primary_shard() {
        let out = Stage::Out(OutStage {
            collection: "target".to_string(),
        });
        let lookup = Stage::Lookup(LookupStage {
            from: "other".to_string(),
            local_field: "a".to_string(),
            foreign_field: "b".to_string(),
            as_field: "joined".to_string(),
        });
        assert!(out.needs_primary_shard());
        assert!(lookup.needs_primary_shard());
        assert!(!Stage::Limit(1).needs_primary_shard());

        let (shard, merger) = out.clone().split_for_sharded();
        assert_eq!(None, shard);
        assert_eq!(Some(out), merger);
    }

    #[test]
    fn lookup_reports_involved_collection() {
        let lookup = Stage::Lookup(LookupStage {
            from: "other".to_string(),
            local_field: "a".to_string(),
            foreign_field: "b".to_string(),
            as_field: "joined".to_string(),
        });
        assert_eq!(
            vec![crate::Namespace::new("test", "other")],
            lookup.involved_collections("test")
        );
        assert!(Stage::Limit(1).involved_collections("test").is_empty());
    }
}

mod serialize {
    use super::*;

    fn serialized(stage: &Stage, explain: bool) -> Vec<Bson> {
        let mut array = Vec::new();
        stage.serialize_to_array(&mut array, explain);
        array
    }

    #[test]
    fn sort_with_limit_emits_two_documents() {
        let stage = sort_stage_with_limit(&[("x", 1), ("y", -1)], 5);
        assert_eq!(
            vec![
                Bson::Document(doc! { "$sort": { "x": 1, "y": -1 } }),
                Bson::Document(doc! { "$limit": 5_i64 }),
            ],
            serialized(&stage, false)
        );
    }

    #[test]
    fn sort_explain_form_is_one_verbose_document() {
        let stage = match sort_stage_with_limit(&[("x", 1)], 5) {
            Stage::Sort(mut sort) => {
                sort.merging = true;
                Stage::Sort(sort)
            }
            _ => unreachable!(),
        };
        assert_eq!(
            vec![Bson::Document(doc! { "$sort": {
                "sortKey": { "x": 1 },
                "limit": 5_i64,
                "mergePresorted": true,
            } })],
            serialized(&stage, true)
        );
    }

    #[test]
    fn unwind_serializes_with_dollar_prefix() {
        assert_eq!(
            vec![Bson::Document(doc! { "$unwind": "$tags" })],
            serialized(&unwind_stage("tags"), false)
        );
    }

    #[test]
    fn other_stage_round_trips_payload() {
        let stage = Stage::Other(crate::stage::OtherStage {
            name: "$sample".to_string(),
            payload: Bson::Document(doc! { "size": 3 }),
        });
        assert_eq!(
            vec![Bson::Document(doc! { "$sample": { "size": 3 } })],
            serialized(&stage, false)
        );
    }
}
