use bson::{Bson, Document};
use mongoagg_datastructures::UniqueLinkedHashMap;

/// Accumulators whose partial results merge exactly. Each function is its
/// own merging function over per-shard partials, with `$push` and
/// `$addToSet` switching to concatenation when the group is merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorFunction {
    Sum,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
}

impl AccumulatorFunction {
    pub fn parse(name: &str) -> Option<AccumulatorFunction> {
        match name {
            "$sum" => Some(AccumulatorFunction::Sum),
            "$min" => Some(AccumulatorFunction::Min),
            "$max" => Some(AccumulatorFunction::Max),
            "$first" => Some(AccumulatorFunction::First),
            "$last" => Some(AccumulatorFunction::Last),
            "$push" => Some(AccumulatorFunction::Push),
            "$addToSet" => Some(AccumulatorFunction::AddToSet),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccumulatorFunction::Sum => "$sum",
            AccumulatorFunction::Min => "$min",
            AccumulatorFunction::Max => "$max",
            AccumulatorFunction::First => "$first",
            AccumulatorFunction::Last => "$last",
            AccumulatorFunction::Push => "$push",
            AccumulatorFunction::AddToSet => "$addToSet",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorExpr {
    pub function: AccumulatorFunction,
    pub arg: Bson,
}

impl AccumulatorExpr {
    /// The accumulator the merger runs over this accumulator's partials,
    /// reading the field the shard half wrote.
    pub fn merging_on(&self, field: &str) -> AccumulatorExpr {
        AccumulatorExpr {
            function: self.function,
            arg: Bson::String(format!("${}", field)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    pub id: Bson,
    pub accumulators: UniqueLinkedHashMap<String, AccumulatorExpr>,
    /// True on the merger half of a split group: inputs are partial
    /// aggregates keyed by `_id`, not raw documents.
    pub doing_merge: bool,
}

impl GroupStage {
    /// Splits into the partial group run on every shard and the merging
    /// group that finalizes per-key results.
    pub fn split_for_sharded(self) -> (GroupStage, GroupStage) {
        let mut merge_accumulators = UniqueLinkedHashMap::new();
        for (field, acc) in self.accumulators.iter() {
            // keys were unique in the source map
            let _ = merge_accumulators.insert(field.clone(), acc.merging_on(field));
        }
        let merger = GroupStage {
            id: Bson::String("$_id".to_string()),
            accumulators: merge_accumulators,
            doing_merge: true,
        };
        (self, merger)
    }

    pub fn to_document(&self) -> Document {
        let mut spec = Document::new();
        spec.insert("_id", self.id.clone());
        for (field, acc) in self.accumulators.iter() {
            let mut operator = Document::new();
            operator.insert(acc.function.name(), acc.arg.clone());
            spec.insert(field.clone(), operator);
        }
        if self.doing_merge {
            spec.insert("$doingMerge", true);
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn group(accumulators: Vec<(&str, AccumulatorFunction, Bson)>) -> GroupStage {
        let mut map = UniqueLinkedHashMap::new();
        for (field, function, arg) in accumulators {
            map.insert(field.to_string(), AccumulatorExpr { function, arg })
                .unwrap();
        }
        GroupStage {
            id: Bson::String("$dept".to_string()),
            accumulators: map,
            doing_merge: false,
        }
    }

    #[test]
    fn split_keys_merger_on_id() {
        let g = group(vec![(
            "total",
            AccumulatorFunction::Sum,
            Bson::String("$qty".to_string()),
        )]);
        let (shard, merger) = g.clone().split_for_sharded();
        assert_eq!(g, shard);
        assert_eq!(Bson::String("$_id".to_string()), merger.id);
        assert!(merger.doing_merge);
        assert_eq!(
            Some(&AccumulatorExpr {
                function: AccumulatorFunction::Sum,
                arg: Bson::String("$total".to_string()),
            }),
            merger.accumulators.get(&"total".to_string())
        );
    }

    #[test]
    fn merging_group_serializes_marker() {
        let g = group(vec![(
            "total",
            AccumulatorFunction::Sum,
            Bson::String("$qty".to_string()),
        )]);
        let (_, merger) = g.split_for_sharded();
        assert_eq!(
            doc! { "_id": "$_id", "total": { "$sum": "$total" }, "$doingMerge": true },
            merger.to_document()
        );
    }
}
