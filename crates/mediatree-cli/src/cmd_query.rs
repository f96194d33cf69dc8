use crate::{Context, print_json};
use anyhow::{Result, bail};
use clap::Subcommand;
use mediatree::v1::TreeSummary;
use serde::Serialize;

#[derive(Subcommand, Debug)]
pub enum QueryOp {
    /// Print every media type of a tree with its children
    Show { tree: String },
    /// List all trees
    Trees,
    /// Print the commits of a tree, oldest first
    Log { tree: String },
    /// Print the open merge requests targeting a tree
    Requests { tree: String },
    /// Print the last commit SOURCE and TARGET have in common
    Base { source: String, target: String },
}

#[derive(Serialize)]
struct TreeListing {
    #[serde(skip_serializing_if = "Option::is_none")]
    main_tree: Option<String>,
    trees: Vec<TreeSummary>,
}

#[derive(Serialize)]
struct MergeBase<'a> {
    source: &'a str,
    target: &'a str,
    commit: Option<String>,
}

pub fn run(op: QueryOp, ctx: &Context) -> Result<()> {
    let projection = ctx.projection()?;

    match op {
        QueryOp::Show { tree } => match projection.tree(&tree)? {
            Some(views) => print_json(&views, ctx.pretty),
            None => bail!("media type tree not found: {}", tree),
        },
        QueryOp::Trees => print_json(
            &TreeListing {
                main_tree: projection.main_tree_id().map(str::to_string),
                trees: projection.trees(),
            },
            ctx.pretty,
        ),
        QueryOp::Log { tree } => print_json(&projection.commits(&tree)?, ctx.pretty),
        QueryOp::Requests { tree } => print_json(&projection.merge_requests(&tree), ctx.pretty),
        QueryOp::Base { source, target } => {
            let commit = projection.last_common_commit(&source, &target)?;
            print_json(
                &MergeBase {
                    source: &source,
                    target: &target,
                    commit,
                },
                ctx.pretty,
            )
        }
    }
}
