use crate::stage::test::match_stage;
use crate::stage::{RedactStage, Stage};
use bson::{doc, Bson};

fn redact_stage() -> Stage {
    Stage::Redact(RedactStage {
        expr: Bson::String("$$PRUNE".to_string()),
    })
}

macro_rules! test_duplicate_match_before_initial_redact {
    ($func_name:ident, expected = $expected:expr, input = $input:expr,) => {
        #[test]
        fn $func_name() {
            use crate::pipeline::optimizer::duplicate_match_before_initial_redact::DuplicateMatchBeforeInitialRedact;
            let actual =
                DuplicateMatchBeforeInitialRedact::duplicate_match_before_initial_redact($input);
            assert_eq!($expected, actual);
        }
    };
}

test_duplicate_match_before_initial_redact!(
    safe_portion_prepended,
    expected = vec![
        match_stage(doc! { "a": 1 }),
        redact_stage(),
        match_stage(doc! { "a": 1, "$where": "this.a == 1" }),
    ],
    input = vec![
        redact_stage(),
        match_stage(doc! { "a": 1, "$where": "this.a == 1" }),
    ],
);

test_duplicate_match_before_initial_redact!(
    fully_unsafe_match_adds_nothing,
    expected = vec![
        redact_stage(),
        match_stage(doc! { "$where": "true" }),
    ],
    input = vec![
        redact_stage(),
        match_stage(doc! { "$where": "true" }),
    ],
);

test_duplicate_match_before_initial_redact!(
    redact_not_first_untouched,
    expected = vec![
        Stage::Limit(1),
        redact_stage(),
        match_stage(doc! { "a": 1 }),
    ],
    input = vec![
        Stage::Limit(1),
        redact_stage(),
        match_stage(doc! { "a": 1 }),
    ],
);

test_duplicate_match_before_initial_redact!(
    idempotent_once_duplicated,
    expected = vec![
        match_stage(doc! { "a": 1 }),
        redact_stage(),
        match_stage(doc! { "a": 1 }),
    ],
    input = vec![
        match_stage(doc! { "a": 1 }),
        redact_stage(),
        match_stage(doc! { "a": 1 }),
    ],
);

test_duplicate_match_before_initial_redact!(
    lone_redact_tolerated,
    expected = vec![redact_stage()],
    input = vec![redact_stage()],
);
