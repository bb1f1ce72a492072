pub mod auth;
pub mod context;
pub mod deps;
pub mod exec;
pub mod namespace;
pub mod options;
pub mod parser;
pub mod pipeline;
pub mod result;
pub mod stage;
pub mod usererror;


use bson::Document;

pub use crate::{
    namespace::Namespace,
    pipeline::Pipeline,
    result::{Error, Result},
};

/// Parses an aggregate command issued against `db` and applies the local
/// rewrite passes, returning a pipeline ready to be split, explained, or
/// stitched and run.
pub fn plan_command(db: &str, cmd: &Document) -> Result<Pipeline> {
    let mut pipeline = parser::parse_command(db, cmd)?;
    pipeline.optimize();
    Ok(pipeline)
}

#[macro_export]
macro_rules! map {
	($($key:expr => $val:expr),* $(,)?) => {
		std::iter::Iterator::collect([
			$({
				($key, $val)
			},)*
		].into_iter())
	};
}
