use crate::stage::{test::inclusion_project, Stage};

macro_rules! test_move_skip_and_limit_before_project {
    ($func_name:ident, expected = $expected:expr, input = $input:expr,) => {
        #[test]
        fn $func_name() {
            use crate::pipeline::optimizer::move_skip_and_limit_before_project::MoveSkipAndLimitBeforeProject;
            let actual =
                MoveSkipAndLimitBeforeProject::move_skip_and_limit_before_project($input);
            assert_eq!($expected, actual);
        }
    };
}

test_move_skip_and_limit_before_project!(
    limit_moves_before_project,
    expected = vec![Stage::Limit(10), inclusion_project(&["a", "b"])],
    input = vec![inclusion_project(&["a", "b"]), Stage::Limit(10)],
);

test_move_skip_and_limit_before_project!(
    skip_moves_before_project,
    expected = vec![Stage::Skip(3), inclusion_project(&["a"])],
    input = vec![inclusion_project(&["a"]), Stage::Skip(3)],
);

test_move_skip_and_limit_before_project!(
    chained_limits_fully_migrate,
    expected = vec![
        Stage::Limit(4),
        Stage::Limit(9),
        inclusion_project(&["a"]),
    ],
    input = vec![
        inclusion_project(&["a"]),
        Stage::Limit(4),
        Stage::Limit(9),
    ],
);

test_move_skip_and_limit_before_project!(
    interleaved_projects_and_limits,
    expected = vec![
        Stage::Limit(4),
        Stage::Limit(9),
        inclusion_project(&["a"]),
        inclusion_project(&["b"]),
    ],
    input = vec![
        inclusion_project(&["a"]),
        Stage::Limit(4),
        inclusion_project(&["b"]),
        Stage::Limit(9),
    ],
);

test_move_skip_and_limit_before_project!(
    unrelated_stages_left_alone,
    expected = vec![Stage::Skip(1), Stage::Limit(2)],
    input = vec![Stage::Skip(1), Stage::Limit(2)],
);

test_move_skip_and_limit_before_project!(
    empty_pipeline_tolerated,
    expected = Vec::<Stage>::new(),
    input = vec![],
);
