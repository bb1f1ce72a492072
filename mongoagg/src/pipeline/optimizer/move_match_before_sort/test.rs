use crate::stage::test::{match_stage, sort_stage};
use bson::doc;

macro_rules! test_move_match_before_sort {
    ($func_name:ident, expected = $expected:expr, input = $input:expr,) => {
        #[test]
        fn $func_name() {
            use crate::pipeline::optimizer::move_match_before_sort::MoveMatchBeforeSort;
            let actual = MoveMatchBeforeSort::move_match_before_sort($input);
            assert_eq!($expected, actual);
        }
    };
}

test_move_match_before_sort!(
    match_swaps_in_front_of_sort,
    expected = vec![
        match_stage(doc! { "x": { "$gt": 0 } }),
        sort_stage(&[("x", 1)]),
    ],
    input = vec![
        sort_stage(&[("x", 1)]),
        match_stage(doc! { "x": { "$gt": 0 } }),
    ],
);

test_move_match_before_sort!(
    text_match_stays_put,
    expected = vec![
        sort_stage(&[("x", 1)]),
        match_stage(doc! { "$text": { "$search": "foo" } }),
    ],
    input = vec![
        sort_stage(&[("x", 1)]),
        match_stage(doc! { "$text": { "$search": "foo" } }),
    ],
);

test_move_match_before_sort!(
    match_hops_one_sort_per_round,
    expected = vec![
        sort_stage(&[("a", 1)]),
        match_stage(doc! { "x": 1 }),
        sort_stage(&[("b", 1)]),
    ],
    input = vec![
        sort_stage(&[("a", 1)]),
        sort_stage(&[("b", 1)]),
        match_stage(doc! { "x": 1 }),
    ],
);

test_move_match_before_sort!(
    empty_pipeline_tolerated,
    expected = Vec::<crate::stage::Stage>::new(),
    input = vec![],
);

test_move_match_before_sort!(
    single_stage_tolerated,
    expected = vec![match_stage(doc! { "a": 1 })],
    input = vec![match_stage(doc! { "a": 1 })],
);
