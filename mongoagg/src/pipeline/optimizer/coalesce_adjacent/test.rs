use crate::stage::test::{match_stage, sort_stage, sort_stage_with_limit};
use crate::stage::Stage;
use bson::doc;

macro_rules! test_coalesce_adjacent {
    ($func_name:ident, expected = $expected:expr, input = $input:expr,) => {
        #[test]
        fn $func_name() {
            use crate::pipeline::optimizer::coalesce_adjacent::CoalesceAdjacent;
            let actual = CoalesceAdjacent::coalesce_adjacent($input);
            assert_eq!($expected, actual);
        }
    };
}

test_coalesce_adjacent!(
    consecutive_limits_keep_minimum,
    expected = vec![Stage::Limit(3)],
    input = vec![Stage::Limit(7), Stage::Limit(3), Stage::Limit(9)],
);

test_coalesce_adjacent!(
    consecutive_skips_sum,
    expected = vec![Stage::Skip(9)],
    input = vec![Stage::Skip(2), Stage::Skip(3), Stage::Skip(4)],
);

test_coalesce_adjacent!(
    adjacent_matches_conjoin,
    expected = vec![match_stage(
        doc! { "$and": [ { "a": 1 }, { "b": 2 }, { "c": 3 } ] }
    )],
    input = vec![
        match_stage(doc! { "a": 1 }),
        match_stage(doc! { "b": 2 }),
        match_stage(doc! { "c": 3 }),
    ],
);

test_coalesce_adjacent!(
    sort_swallows_following_limit,
    expected = vec![sort_stage_with_limit(&[("x", 1)], 4)],
    input = vec![sort_stage(&[("x", 1)]), Stage::Limit(4)],
);

test_coalesce_adjacent!(
    limit_then_skip_untouched,
    expected = vec![Stage::Limit(5), Stage::Skip(6)],
    input = vec![Stage::Limit(5), Stage::Skip(6)],
);

test_coalesce_adjacent!(
    empty_pipeline_tolerated,
    expected = Vec::<Stage>::new(),
    input = vec![],
);
